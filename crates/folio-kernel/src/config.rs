//! Configuration.
//!
//! Loaded from TOML: `$FOLIO_CONFIG` if set, else
//! `<config_dir>/folio/config.toml`, else built-in defaults. Every field has a
//! default, so a partial file is fine.
//!
//! ```toml
//! [idempotency]
//! ttl_secs = 180
//! bucket_secs = 120
//!
//! [scan]
//! max_blocks = 2000
//! page_size = 100
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use folio_store::{LockConfig, StoreConfig};
use folio_types::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blocks::ScanLimits;
use crate::coordinator::CoordinatorConfig;
use crate::remote::MAX_PAGE_SIZE;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "FOLIO_CONFIG";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("no {0} directory on this platform; set an explicit path")]
    NoDirectory(&'static str),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Parse(_) | ConfigError::Invalid(_) => ErrorKind::InvalidInput,
            ConfigError::Read { .. } | ConfigError::NoDirectory(_) => ErrorKind::InternalError,
        }
    }
}

/// Idempotency store and coordinator settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencySection {
    pub ttl_secs: u64,
    pub bucket_secs: u64,
    pub lock_wait_secs: u64,
    pub lock_stale_secs: u64,
    pub poll_interval_ms: u64,
    pub pending_deadline_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for IdempotencySection {
    fn default() -> Self {
        Self {
            ttl_secs: 180,
            bucket_secs: 120,
            lock_wait_secs: 30,
            lock_stale_secs: 30,
            poll_interval_ms: 50,
            pending_deadline_secs: 15,
            path: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub max_blocks: usize,
    pub page_size: usize,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            max_blocks: 2000,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencySection {
    /// Concurrent deletions during range replacement.
    pub max_in_flight: usize,
}

impl Default for ConcurrencySection {
    fn default() -> Self {
        Self { max_in_flight: 4 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaSection {
    pub cache_ttl_secs: u64,
}

impl Default for SchemaSection {
    fn default() -> Self {
        Self { cache_ttl_secs: 600 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolioConfig {
    pub idempotency: IdempotencySection,
    pub scan: ScanSection,
    pub concurrency: ConcurrencySection,
    pub schema: SchemaSection,
    pub audit: AuditSection,
}

impl FolioConfig {
    /// Load from `$FOLIO_CONFIG`, the user config dir, or defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load_from(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load and validate a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// `<config_dir>/folio/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("folio").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.page_size == 0 || self.scan.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "scan.page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.scan.page_size
            )));
        }
        if self.scan.max_blocks == 0 {
            return Err(ConfigError::Invalid("scan.max_blocks must be positive".into()));
        }
        if self.idempotency.bucket_secs == 0 {
            return Err(ConfigError::Invalid("idempotency.bucket_secs must be positive".into()));
        }
        if self.concurrency.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.max_in_flight must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Store file path: explicit, else `<data_local_dir>/folio/idempotency.json`.
    pub fn store_path(&self) -> Result<PathBuf, ConfigError> {
        data_path(self.idempotency.path.as_deref(), "idempotency.json")
    }

    /// Audit log path: explicit, else `<data_local_dir>/folio/audit.jsonl`.
    pub fn audit_path(&self) -> Result<PathBuf, ConfigError> {
        data_path(self.audit.path.as_deref(), "audit.jsonl")
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            ttl: Duration::from_secs(self.idempotency.ttl_secs),
        }
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            wait: Duration::from_secs(self.idempotency.lock_wait_secs),
            stale_after: Duration::from_secs(self.idempotency.lock_stale_secs),
            ..LockConfig::default()
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            bucket: Duration::from_secs(self.idempotency.bucket_secs),
            poll_interval: Duration::from_millis(self.idempotency.poll_interval_ms),
            pending_deadline: Duration::from_secs(self.idempotency.pending_deadline_secs),
        }
    }

    pub fn scan_limits(&self) -> ScanLimits {
        ScanLimits {
            max_blocks: self.scan.max_blocks,
            page_size: self.scan.page_size,
        }
    }

    pub fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.schema.cache_ttl_secs)
    }
}

fn data_path(explicit: Option<&Path>, file_name: &str) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    dirs::data_local_dir()
        .map(|d| d.join("folio").join(file_name))
        .ok_or(ConfigError::NoDirectory("data"))
}
