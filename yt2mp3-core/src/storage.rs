use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Directory-backed key/value store, one file per key.
///
/// Reads never fail: a missing key is `None` and unreadable content is logged
/// and treated as missing. Writes replace the file atomically.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            source,
            path: dir.clone(),
        })?;
        Ok(Self { dir })
    }

    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        let path = self.key_path(key).ok()?;
        match fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(key, path = %path.display(), error = %err, "unreadable stored value");
                None
            }
        }
    }

    /// Decodes the stored JSON value, logging and discarding malformed content.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "discarding malformed stored value");
                None
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let path = self.key_path(key)?;
        let encoded = serde_json::to_vec_pretty(value)?;
        let io_err = |source: io::Error| StorageError::Io {
            source,
            path: path.clone(),
        };
        let mut staging = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        staging.write_all(&encoded).map_err(io_err)?;
        staging.flush().map_err(io_err)?;
        staging.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { source, path }),
        }
    }
}
