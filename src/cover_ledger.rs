//! Resolved-location cache, blacklist, and negative cache.
//!
//! The first two persist as JSON blobs and are flushed in batches; the
//! negative cache lives for the session only.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use log::{debug, warn};

use crate::album_key::AlbumKey;
use crate::blob_store::BlobStore;

pub const COVERS_BLOB: &str = "covers.json";
pub const WRONG_COVERS_BLOB: &str = "wrong-covers.json";

/// Locations that point at local files are never blacklisted.
pub fn is_local_location(location: &str) -> bool {
    location.starts_with('/') || Path::new(location).is_absolute()
}

#[derive(Debug, Default)]
pub struct CoverLedger {
    resolved: HashMap<String, String>,
    blacklist: HashMap<String, BTreeSet<String>>,
    not_found: HashSet<String>,
    dirty: bool,
}

/// Point-in-time copy of the persisted maps, written outside the lock.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    resolved: HashMap<String, String>,
    blacklist: HashMap<String, BTreeSet<String>>,
}

impl CoverLedger {
    /// Loads both persisted maps; anything unreadable starts out empty.
    pub fn load(store: &dyn BlobStore) -> Self {
        Self {
            resolved: load_blob(store, COVERS_BLOB).unwrap_or_default(),
            blacklist: load_blob(store, WRONG_COVERS_BLOB).unwrap_or_default(),
            not_found: HashSet::new(),
            dirty: false,
        }
    }

    pub fn resolved_location(&self, key: &AlbumKey) -> Option<&str> {
        self.resolved.get(key.key()).map(String::as_str)
    }

    pub fn record_location(&mut self, key: &AlbumKey, location: &str) {
        let previous = self
            .resolved
            .insert(key.key().to_string(), location.to_string());
        if previous.as_deref() != Some(location) {
            self.dirty = true;
        }
    }

    /// Blacklist check. When `location` starts with a volatile prefix, any
    /// rejected location sharing that prefix rejects it too.
    pub fn is_blacklisted(
        &self,
        key: &AlbumKey,
        location: &str,
        volatile_prefixes: &[String],
    ) -> bool {
        let Some(rejected) = self.blacklist.get(key.key()) else {
            return false;
        };
        if let Some(prefix) = volatile_prefixes
            .iter()
            .find(|prefix| location.starts_with(prefix.as_str()))
        {
            return rejected
                .iter()
                .any(|wrong| wrong.starts_with(prefix.as_str()));
        }
        rejected.contains(location)
    }

    /// Moves the recorded location for `key` into the blacklist.
    ///
    /// Returns the rejected location, or `None` when nothing was recorded or
    /// the recorded location is a local file.
    pub fn reject_current(&mut self, key: &AlbumKey) -> Option<String> {
        let location = self.resolved.get(key.key())?;
        if is_local_location(location) {
            return None;
        }
        let location = self.resolved.remove(key.key())?;
        self.blacklist
            .entry(key.key().to_string())
            .or_default()
            .insert(location.clone());
        self.dirty = true;
        Some(location)
    }

    /// Drops everything known about `key` from all three caches.
    pub fn forget(&mut self, key: &AlbumKey) {
        let had_location = self.resolved.remove(key.key()).is_some();
        let had_rejections = self.blacklist.remove(key.key()).is_some();
        self.not_found.remove(key.key());
        if had_location || had_rejections {
            self.dirty = true;
        }
    }

    /// Empties all three caches; the next flush overwrites the blobs.
    pub fn reset(&mut self) {
        self.resolved.clear();
        self.blacklist.clear();
        self.not_found.clear();
        self.dirty = true;
    }

    pub fn mark_not_found(&mut self, key: &AlbumKey) {
        self.not_found.insert(key.key().to_string());
    }

    pub fn is_known_not_found(&self, key: &AlbumKey) -> bool {
        self.not_found.contains(key.key())
    }

    /// Copies the persisted maps if they changed since the last snapshot.
    pub fn take_snapshot(&mut self) -> Option<LedgerSnapshot> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(LedgerSnapshot {
            resolved: self.resolved.clone(),
            blacklist: self.blacklist.clone(),
        })
    }
}

impl LedgerSnapshot {
    /// Best-effort write of both blobs; failures are logged and dropped.
    pub fn persist(&self, store: &dyn BlobStore) {
        store_blob(store, COVERS_BLOB, &self.resolved);
        store_blob(store, WRONG_COVERS_BLOB, &self.blacklist);
    }
}

fn load_blob<T>(store: &dyn BlobStore, name: &str) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    let bytes = match store.load(name) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(err) => {
            warn!("Cannot load cover state {}: {}", name, err);
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("Discarding unreadable cover state {}: {}", name, err);
            None
        }
    }
}

fn store_blob<T>(store: &dyn BlobStore, name: &str, value: &T)
where
    T: serde::Serialize,
{
    let bytes = match serde_json::to_vec(value) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("Cannot serialize cover state {}: {}", name, err);
            return;
        }
    };
    match store.store(name, &bytes) {
        Ok(()) => debug!("Saved cover state {} ({} bytes)", name, bytes.len()),
        Err(err) => warn!("Cannot save cover state {}: {}", name, err),
    }
}
