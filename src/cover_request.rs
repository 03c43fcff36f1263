//! The request record that travels between the dispatcher and the workers.

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;

use crate::album_key::AlbumKey;
use crate::protocol::CoverListener;
use crate::providers::ProviderList;

/// Lifecycle of one lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoverState {
    New,
    CacheFetch,
    WebFetch,
    CreateBitmap,
    Found,
    NotFound,
}

/// Size bounds for decoded covers. `None` keeps the native size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverSizing {
    /// Bound for the display copy of network covers.
    pub cover_max_size: Option<u32>,
    /// Bound applied when reading covers back from local storage.
    pub cached_cover_max_size: Option<u32>,
}

impl CoverSizing {
    pub fn native() -> Self {
        Self::default()
    }

    pub fn bounded(max_size: u32) -> Self {
        Self {
            cover_max_size: Some(max_size),
            cached_cover_max_size: Some(max_size),
        }
    }
}

/// Decoded cover handles.
///
/// `full` is only present while the full-resolution decode differs from the
/// primary one; when no sampling was needed both roles share one allocation.
#[derive(Debug, Clone)]
pub struct CoverImages {
    pub primary: Arc<DynamicImage>,
    pub full: Option<Arc<DynamicImage>>,
}

impl CoverImages {
    pub fn single(image: DynamicImage) -> Self {
        Self {
            primary: Arc::new(image),
            full: None,
        }
    }

    /// Independent deep copy for another listener, including the
    /// full-resolution image when one was kept.
    pub fn duplicate(&self) -> Self {
        Self {
            primary: Arc::new(self.primary.as_ref().clone()),
            full: self
                .full
                .as_ref()
                .map(|full| Arc::new(full.as_ref().clone())),
        }
    }

    pub fn full_resolution(&self) -> &Arc<DynamicImage> {
        self.full.as_ref().unwrap_or(&self.primary)
    }
}

/// One in-progress lookup. Owned by exactly one stage at a time: the
/// dispatcher moves it into a worker job and the worker sends it back.
pub struct CoverRequest {
    pub key: AlbumKey,
    pub state: CoverState,
    pub priority: bool,
    pub given_up: bool,
    pub sizing: CoverSizing,
    /// Album directory hint; only lookups carrying one are negative-cached.
    pub parent_directory: Option<String>,
    pub cover_bytes: Option<Vec<u8>>,
    pub images: Option<CoverImages>,
    /// Index into `providers` of the last provider attempted.
    pub last_provider: Option<usize>,
    /// Provider snapshot taken at submission; later reconfiguration does not
    /// move this record's cursor.
    pub providers: Arc<ProviderList>,
    pub listener: Option<Arc<dyn CoverListener>>,
}

impl CoverRequest {
    pub fn new(
        key: AlbumKey,
        sizing: CoverSizing,
        priority: bool,
        parent_directory: Option<String>,
        providers: Arc<ProviderList>,
        listener: Arc<dyn CoverListener>,
    ) -> Self {
        Self {
            key,
            state: CoverState::New,
            priority,
            given_up: false,
            sizing,
            parent_directory: parent_directory.filter(|dir| !dir.trim().is_empty()),
            cover_bytes: None,
            images: None,
            last_provider: None,
            providers,
            listener: Some(listener),
        }
    }

    pub fn has_cover_bytes(&self) -> bool {
        self.cover_bytes
            .as_ref()
            .is_some_and(|bytes| !bytes.is_empty())
    }

    pub fn last_provider_name(&self) -> &str {
        self.last_provider
            .map(|index| self.providers.provider_name(index))
            .unwrap_or("<none>")
    }

    pub fn last_provider_is_local(&self) -> bool {
        self.last_provider
            .and_then(|index| self.providers.get(index))
            .is_some_and(|provider| provider.is_local_storage())
    }
}

impl fmt::Debug for CoverRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverRequest")
            .field("key", &self.key.to_string())
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("given_up", &self.given_up)
            .field("bytes", &self.cover_bytes.as_ref().map(Vec::len))
            .field("has_images", &self.images.is_some())
            .field("last_provider", &self.last_provider_name())
            .finish()
    }
}
