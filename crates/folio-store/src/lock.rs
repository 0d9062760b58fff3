//! Advisory lock on a sibling lock file.
//!
//! The lock file is created once and never removed. Holding the store means
//! holding an exclusive `flock` on it (via `fs2`), which the kernel drops when
//! the holder exits or crashes, so a lock abandoned by a dead process is
//! reclaimed by the next contender without anyone deleting files.
//!
//! The holder writes its pid and acquisition time into the file. Contenders
//! back off with jitter until the wait budget is spent, and warn when the
//! recorded holder has kept the lock past the staleness threshold.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Lock acquisition tuning.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Give up after waiting this long.
    pub wait: Duration,
    /// A holder older than this is reported as stuck.
    pub stale_after: Duration,
    /// First backoff step.
    pub base_backoff: Duration,
    /// Backoff ceiling (before jitter).
    pub max_backoff: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(30),
            stale_after: Duration::from_secs(30),
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(250),
        }
    }
}

/// Holder record written into the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    acquired_ms: u64,
}

/// A held advisory lock. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
}

impl FileLock {
    /// Acquire the lock at `path`, retrying with jittered backoff.
    pub fn acquire(path: &Path, config: &LockConfig) -> StoreResult<Self> {
        let start = Instant::now();
        let mut attempts: u32 = 0;
        let mut warned = false;

        loop {
            attempts += 1;
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    if attempts > 1 {
                        debug!(
                            path = %path.display(),
                            attempts,
                            waited_ms = start.elapsed().as_millis() as u64,
                            "store lock acquired after contention"
                        );
                    }
                    let mut lock = Self {
                        path: path.to_path_buf(),
                        file,
                    };
                    if let Err(e) = lock.record_owner() {
                        debug!(path = %path.display(), error = %e, "could not record lock owner");
                    }
                    return Ok(lock);
                }
                Err(e) if is_contended(&e) => {
                    if !warned {
                        warned = warn_if_stuck(path, config.stale_after);
                    }
                }
                Err(e) => return Err(StoreError::Io(e)),
            }

            let elapsed = start.elapsed();
            if elapsed >= config.wait {
                return Err(StoreError::LockTimeout {
                    path: path.to_path_buf(),
                    waited: elapsed,
                    attempts,
                });
            }

            let remaining = config.wait - elapsed;
            std::thread::sleep(backoff(attempts - 1, config).min(remaining));
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly. Equivalent to dropping.
    pub fn release(self) {}

    fn record_owner(&mut self) -> io::Result<()> {
        let owner = LockOwner {
            pid: std::process::id(),
            acquired_ms: folio_types::now_millis(),
        };
        let body = serde_json::to_vec(&owner).map_err(io::Error::other)?;
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&body)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to unlock store lock");
        }
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Warn once if the recorded holder has held the lock past `stale_after`.
fn warn_if_stuck(path: &Path, stale_after: Duration) -> bool {
    let Some(owner) = fs::read(path)
        .ok()
        .and_then(|body| serde_json::from_slice::<LockOwner>(&body).ok())
    else {
        return false;
    };
    let held_ms = folio_types::now_millis().saturating_sub(owner.acquired_ms);
    if held_ms < stale_after.as_millis() as u64 {
        return false;
    }
    warn!(
        path = %path.display(),
        holder_pid = owner.pid,
        held_ms,
        "store lock held past the staleness threshold"
    );
    true
}

/// Exponential backoff with jitter: `base * 2^attempt`, capped, plus up to
/// half a base step of random jitter so contenders do not retry in lockstep.
fn backoff(attempt: u32, config: &LockConfig) -> Duration {
    let step = config
        .base_backoff
        .saturating_mul(1u32 << attempt.min(5))
        .min(config.max_backoff);
    let jitter_range = (config.base_backoff.as_millis() as u64 / 2).max(1);
    let jitter = rand::thread_rng().gen_range(0..=jitter_range);
    step + Duration::from_millis(jitter)
}
