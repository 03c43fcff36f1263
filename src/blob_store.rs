//! Named key/value blobs backing the persisted cover state.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// Durable storage for opaque blobs. `load` returns `Ok(None)` when nothing
/// was stored under `name`; `store` replaces the blob atomically.
pub trait BlobStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, String>;

    fn store(&self, name: &str, bytes: &[u8]) -> Result<(), String>;
}

/// One file per blob inside `root`.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn default_root() -> Option<PathBuf> {
        dirs::cache_dir().map(|path| path.join("roqtune").join("covers"))
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl BlobStore for FileBlobStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, String> {
        let path = self.blob_path(name);
        match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(format!("failed to read {}: {err}", path.display())),
        }
    }

    fn store(&self, name: &str, bytes: &[u8]) -> Result<(), String> {
        fs::create_dir_all(&self.root)
            .map_err(|err| format!("failed to create {}: {err}", self.root.display()))?;
        let target = self.blob_path(name);
        let temp = self.blob_path(&format!("{name}.tmp"));
        fs::write(&temp, bytes).map_err(|err| format!("failed to write {}: {err}", temp.display()))?;
        fs::rename(&temp, &target).map_err(|err| {
            let _ = fs::remove_file(&temp);
            format!("failed to replace {}: {err}", target.display())
        })
    }
}

/// Volatile store for tests and for running without a writable cache dir.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, String> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.get(name).cloned())
    }

    fn store(&self, name: &str, bytes: &[u8]) -> Result<(), String> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}
