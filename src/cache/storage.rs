//! Persistence Adapter
//!
//! Reads and writes `{"urls": [...]}` record documents. The same format is
//! used for configuration files and for the per-shard cache files.
//!
//! # Design
//!
//! - Pluggable backend so the engine can be exercised against failing or
//!   in-memory storage
//! - Flushes replace the whole file via write-to-temp, fsync, rename, so a
//!   crash never leaves a half-written shard image behind

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::entry::UrlRecords;
use crate::error::{Error, Result};

/// Storage backend for record documents
pub trait ShardStorage: Send + Sync {
    /// Read and parse a record document
    fn load(&self, path: &Path) -> Result<UrlRecords>;

    /// Replace the document at `path` with `records`
    fn flush(&self, path: &Path, records: &UrlRecords) -> Result<()>;
}

/// JSON files on the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileStorage;

impl JsonFileStorage {
    pub fn new() -> Self {
        Self
    }

    /// Sibling path the image is staged at before the rename
    pub fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        path.with_file_name(name)
    }

    fn write_staged(tmp: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(tmp)?;
        file.write_all(data)?;
        file.sync_all()
    }
}

impl ShardStorage for JsonFileStorage {
    fn load(&self, path: &Path) -> Result<UrlRecords> {
        let data = fs::read(path).map_err(|e| Error::io(path, e))?;
        let records: UrlRecords = serde_json::from_slice(&data).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!("Read {} records from {}", records.len(), path.display());
        Ok(records)
    }

    fn flush(&self, path: &Path, records: &UrlRecords) -> Result<()> {
        let data = serde_json::to_vec(records).map_err(Error::Encode)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }

        let tmp = Self::temp_path(path);
        if let Err(e) = Self::write_staged(&tmp, &data) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::io(&tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::io(path, e));
        }

        debug!("Wrote {} records to {}", records.len(), path.display());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
