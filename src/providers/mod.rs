//! Cover providers and the ordered list the fetch workers walk.

mod album_folder;
mod disk_cache;
mod server_folder;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;

use crate::album_key::AlbumKey;

pub use album_folder::AlbumFolderProvider;
pub use disk_cache::DiskCoverCache;
pub use server_folder::ServerFolderProvider;

/// Write side of the local cover cache.
pub trait CoverStore: Send + Sync {
    /// Persists a decoded cover for `key`, returning where it landed.
    fn save(&self, key: &AlbumKey, image: &DynamicImage) -> Result<PathBuf, String>;

    fn delete(&self, key: &AlbumKey) -> Result<(), String>;

    /// Removes every cached cover, returning how many files were deleted.
    fn clear(&self) -> usize;
}

/// Source of candidate cover locations for an identity.
pub trait CoverProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Local-storage providers run in the cache tier, everything else in the
    /// network tier.
    fn is_local_storage(&self) -> bool;

    /// Ranked candidate locations, best first. `directory` is the album's
    /// directory hint relative to the music root, when known.
    fn resolve_locations(&self, key: &AlbumKey, directory: Option<&str>) -> Vec<String>;

    /// Unavailable providers (missing credentials, unreachable config) are skipped.
    fn is_available(&self) -> bool {
        true
    }

    /// Providers that mint a fresh tokenized URL per request declare the
    /// stable prefix so a rejection covers every URL they generate.
    fn volatile_location_prefix(&self) -> Option<&str> {
        None
    }

    /// Only the cover cache exposes a store.
    fn cover_store(&self) -> Option<&dyn CoverStore> {
        None
    }
}

/// Immutable, ordered provider snapshot. Order is retry order.
#[derive(Clone, Default)]
pub struct ProviderList {
    entries: Vec<Arc<dyn CoverProvider>>,
}

impl ProviderList {
    pub fn new(entries: Vec<Arc<dyn CoverProvider>>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn CoverProvider>> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CoverProvider>> {
        self.entries.iter()
    }

    /// True when `index` is the final entry. Indices past the end count as
    /// last too, so a stale cursor never schedules another pass.
    pub fn is_last(&self, index: usize) -> bool {
        index.saturating_add(1) >= self.entries.len()
    }

    /// Position of the cover cache, the first local provider with a store.
    pub fn cache_index(&self) -> Option<usize> {
        self.entries.iter().position(|provider| {
            provider.is_local_storage() && provider.cover_store().is_some()
        })
    }

    pub fn cache_store(&self) -> Option<&dyn CoverStore> {
        let index = self.cache_index()?;
        self.entries[index].cover_store()
    }

    pub fn volatile_prefixes(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|provider| provider.volatile_location_prefix())
            .map(str::to_string)
            .collect()
    }

    pub fn provider_name(&self, index: usize) -> &str {
        self.entries
            .get(index)
            .map(|provider| provider.name())
            .unwrap_or("<none>")
    }
}

impl fmt::Debug for ProviderList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|provider| provider.name()))
            .finish()
    }
}
