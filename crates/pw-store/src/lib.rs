//! pw-store
//!
//! Single-record JSON file holding the latest report of one kind
//! (divergence report or anomaly batch).
//!
//! # Invariants
//!
//! - A write replaces the record wholesale via temp file + fsync + rename in
//!   the same directory. Readers see the old record or the new one, never a
//!   torn file.
//! - "Nothing written yet" is [`Stored::NotYet`], not an error.
//! - A file that exists but does not decode is [`StoreError::Corrupt`]. There
//!   is no in-memory fallback.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, source: io::Error },
    /// The record exists but is not a valid document of the expected type.
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    Serialize(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io { path, source } => {
                write!(f, "report store io error at {}: {source}", path.display())
            }
            StoreError::Corrupt { path, source } => {
                write!(f, "report at {} is corrupt: {source}", path.display())
            }
            StoreError::Serialize(source) => write!(f, "report serialization failed: {source}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Corrupt { source, .. } => Some(source),
            StoreError::Serialize(source) => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Read result
// ---------------------------------------------------------------------------

/// Outcome of a successful read.
#[derive(Debug, Clone, PartialEq)]
pub enum Stored<T> {
    Available(T),
    /// No pass has written a record yet.
    NotYet,
}

impl<T> Stored<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Stored::Available(v) => Some(v),
            Stored::NotYet => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Stored::Available(_))
    }
}

// ---------------------------------------------------------------------------
// ReportStore
// ---------------------------------------------------------------------------

/// Distinguishes temp files of concurrent writers inside one process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct ReportStore<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for ReportStore<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _record: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ReportStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportStore").field("path", &self.path).finish()
    }
}

impl<T> ReportStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Stored<T>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Stored::NotYet),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let record = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        Ok(Stored::Available(record))
    }

    /// Replace the persisted record.
    pub fn write(&self, record: &T) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(record).map_err(StoreError::Serialize)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let file_name = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("report.json");
        let tmp_path = dir.join(format!(
            ".{}.tmp.{}.{}",
            file_name,
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(err) = write_synced(&tmp_path, &content) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
        if let Err(source) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::Io {
                path: self.path.clone(),
                source,
            });
        }
        sync_dir(&dir);

        debug!(path = %self.path.display(), bytes = content.len(), "report written");
        Ok(())
    }
}

fn write_synced(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::create(path).map_err(io_err)?;
    file.write_all(content).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}

/// Persist the rename itself. Not every platform can open a directory, so
/// this is best effort.
fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}
