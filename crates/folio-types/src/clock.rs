//! Wall clock abstraction.
//!
//! TTL pruning and idempotency time buckets both read wall-clock time. Tests
//! swap in a manual clock so they can cross a TTL or a bucket boundary without
//! sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Source of Unix-millisecond timestamps.
#[derive(Clone, Debug, Default)]
pub enum Clock {
    /// Real system time.
    #[default]
    System,
    /// Manually advanced time, shared between clones.
    Manual(Arc<AtomicU64>),
}

impl Clock {
    /// The real system clock.
    pub fn system() -> Self {
        Clock::System
    }

    /// A manual clock starting at `start_millis`.
    pub fn manual(start_millis: u64) -> Self {
        Clock::Manual(Arc::new(AtomicU64::new(start_millis)))
    }

    /// Current time as Unix milliseconds.
    pub fn now_millis(&self) -> u64 {
        match self {
            Clock::System => crate::now_millis(),
            Clock::Manual(millis) => millis.load(Ordering::SeqCst),
        }
    }

    /// Move a manual clock forward. No-op on the system clock.
    pub fn advance(&self, by: Duration) {
        if let Clock::Manual(millis) = self {
            millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    /// Set a manual clock to an absolute time. No-op on the system clock.
    pub fn set(&self, now_millis: u64) {
        if let Clock::Manual(millis) = self {
            millis.store(now_millis, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = Clock::manual(1_000);
        let other = clock.clone();
        other.advance(Duration::from_secs(2));
        assert_eq!(clock.now_millis(), 3_000);
        clock.set(10);
        assert_eq!(other.now_millis(), 10);
    }

    #[test]
    fn test_system_clock_ignores_advance() {
        let clock = Clock::system();
        let before = clock.now_millis();
        clock.advance(Duration::from_secs(3600));
        assert!(clock.now_millis() < before + 3_600_000);
    }
}
