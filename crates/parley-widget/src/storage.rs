//! Key/value persistence backends for the session store.
//!
//! [`StateStorage`] is the seam: the widget only ever reads or replaces one
//! whole record per key. Swap [`FileStorage`] for a browser-storage binding
//! (or anything else) without touching [`crate::session::SessionStore`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::error::PersistenceError;

/// A durable string record store.
pub trait StateStorage: Send + Sync {
    /// Read the record at `key`; `Ok(None)` when nothing was stored yet.
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Replace the record at `key`.
    fn write(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    /// Remove the record at `key`; removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// One JSON file per key under a directory.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves either the old or the new record. On a
/// multi-threaded tokio runtime the file I/O runs through
/// [`tokio::task::block_in_place`] so other tasks move off the worker.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl StateStorage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key);
        blocking_io(|| -> Result<Option<String>, PersistenceError> {
            match std::fs::read_to_string(path) {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn write(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        blocking_io(|| -> Result<(), PersistenceError> {
            std::fs::create_dir_all(&self.dir)?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, value)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        blocking_io(|| -> Result<(), PersistenceError> {
            match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

// `block_in_place` panics on a current-thread runtime, so it is used only on
// the multi-threaded one.
fn blocking_io<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// In-memory storage.
///
/// Clones share the same map, which models several widget instances (tabs)
/// writing to one storage key.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, PersistenceError> {
        self.records
            .lock()
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))
    }
}

impl StateStorage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
