//! File-backed store shared between processes.
//!
//! The whole entry map lives in one JSON file. Writes go to a temporary file
//! in the same directory which is then renamed over the real one, so a reader
//! never observes a partial write. Every access holds the sibling
//! `<file>.lock` advisory lock.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::backend::{ExclusiveAccess, StoreBackend};
use crate::entry::{EntryMap, STORE_FORMAT_VERSION, StoreFile};
use crate::error::{StoreError, StoreResult};
use crate::lock::{FileLock, LockConfig};

/// JSON file backend with an advisory lock file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    lock_path: PathBuf,
    lock: LockConfig,
}

impl FileBackend {
    /// Open (or prepare to create) the store file at `path`.
    ///
    /// Parent directories are created. The file itself is created on the
    /// first write.
    pub fn open(path: impl Into<PathBuf>, lock: LockConfig) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let lock_path = {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            path.with_file_name(format!("{name}.lock"))
        };
        Ok(Self {
            path,
            lock_path,
            lock,
        })
    }

    /// Store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock file path.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn read_entries(&self) -> StoreResult<EntryMap> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(EntryMap::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(EntryMap::new());
        }
        let file: StoreFile = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(file.entries)
    }

    fn write_entries(&self, entries: &EntryMap) -> StoreResult<()> {
        let file = StoreFile {
            version: STORE_FORMAT_VERSION,
            entries: entries.clone(),
        };
        let body = serde_json::to_vec_pretty(&file)?;

        let mut temp = NamedTempFile::new_in(self.dir())?;
        temp.write_all(&body)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        debug!(path = %self.path.display(), entries = entries.len(), "store file written");
        Ok(())
    }
}

struct FileAccess<'a> {
    backend: &'a FileBackend,
    _lock: FileLock,
}

impl ExclusiveAccess for FileAccess<'_> {
    fn read(&mut self) -> StoreResult<EntryMap> {
        self.backend.read_entries()
    }

    fn write(&mut self, entries: &EntryMap) -> StoreResult<()> {
        self.backend.write_entries(entries)
    }
}

impl StoreBackend for FileBackend {
    fn acquire(&self) -> StoreResult<Box<dyn ExclusiveAccess + '_>> {
        let lock = FileLock::acquire(&self.lock_path, &self.lock)?;
        Ok(Box::new(FileAccess {
            backend: self,
            _lock: lock,
        }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
