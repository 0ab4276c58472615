use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::StoreError;

pub const CYCLE_META_KEY: &str = "cycle-meta";
pub const APP_STATE_KEY: &str = "app-state";

/// Small-record key-value persistence. Each single-key read or write is
/// atomic; nothing spans keys.
pub trait DurableStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    /// Blocks until no other holder is doing a read-modify-write of `key`.
    fn lock(&self, key: &str) -> Result<KeyLock, StoreError>;
}

/// Held for the duration of a read-modify-write. Dropping it releases the
/// underlying advisory lock.
#[derive(Debug)]
pub struct KeyLock {
    _file: Option<File>,
}

/// One JSON document per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io("<root>", e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    fn temp_path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.json.{}.tmp", key, std::process::id()))
    }
}

impl DurableStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let tmp = self.temp_path_for(key);
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, self.path_for(key))
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::io(key, e)
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    fn lock(&self, key: &str) -> Result<KeyLock, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.root.join(format!("{}.lock", key)))
            .map_err(|e| StoreError::io(key, e))?;
        file.lock_exclusive().map_err(|e| StoreError::io(key, e))?;
        Ok(KeyLock { _file: Some(file) })
    }
}

#[cfg(test)]
pub use memory::MemoryStore;
