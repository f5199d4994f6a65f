//! Durable key/value storage for the queue.

use crate::{lock, Error};
use std::{
    collections::HashMap,
    fmt::Debug,
    fs,
    io::ErrorKind,
    path::PathBuf,
    sync::Mutex,
};

/// Durable key/value store holding serialized queues.
///
/// Only the queue talks to the store. Every error is caught there and reported through the
/// fallback logger, so implementations may fail freely.
pub trait Store: Debug + Send + Sync {
    /// Read the value stored under `key`.
    fn load(&self, key: &str) -> Result<Option<String>, Error>;

    /// Replace the value stored under `key`.
    fn save(&self, key: &str, value: &str) -> Result<(), Error>;
}

/// Store that lives as long as the process. Useful for tests and for clients without durable
/// storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), Error> {
        lock(&self.values).insert(key.into(), value.into());
        Ok(())
    }
}

/// Store keeping one JSON file per key inside a directory.
///
/// Writes go to a temporary file first and are renamed into place, so a crash mid-write leaves
/// the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store files below `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

impl Store for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, Error> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), Error> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, value)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}
