//! Cover lookup outcomes and the listener seam callers implement.
//!
//! Listeners are invoked from the dispatcher thread, so implementations must
//! hand work off instead of blocking. Channel senders already do that, which
//! is why both std and tokio broadcast senders implement [`CoverListener`].

use std::sync::{mpsc, Arc};

use tokio::sync::broadcast;

use crate::album_key::AlbumKey;
use crate::cover_request::CoverImages;

/// Lookup notifications delivered over a channel.
#[derive(Debug, Clone)]
pub enum CoverEvent {
    /// The cache tier missed and a network fetch is starting.
    Started(AlbumKey),
    Found { key: AlbumKey, images: CoverImages },
    NotFound(AlbumKey),
}

impl CoverEvent {
    pub fn key(&self) -> &AlbumKey {
        match self {
            Self::Started(key) | Self::NotFound(key) => key,
            Self::Found { key, .. } => key,
        }
    }

    /// `Found` and `NotFound` end a lookup; `Started` does not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started(_))
    }
}

/// Receives the outcome of one submitted lookup.
pub trait CoverListener: Send + Sync {
    fn on_started(&self, _key: &AlbumKey) {}

    fn on_found(&self, key: &AlbumKey, images: CoverImages);

    fn on_not_found(&self, key: &AlbumKey);
}

impl CoverListener for mpsc::Sender<CoverEvent> {
    fn on_started(&self, key: &AlbumKey) {
        let _ = self.send(CoverEvent::Started(key.clone()));
    }

    fn on_found(&self, key: &AlbumKey, images: CoverImages) {
        let _ = self.send(CoverEvent::Found {
            key: key.clone(),
            images,
        });
    }

    fn on_not_found(&self, key: &AlbumKey) {
        let _ = self.send(CoverEvent::NotFound(key.clone()));
    }
}

impl CoverListener for broadcast::Sender<CoverEvent> {
    fn on_started(&self, key: &AlbumKey) {
        let _ = self.send(CoverEvent::Started(key.clone()));
    }

    fn on_found(&self, key: &AlbumKey, images: CoverImages) {
        let _ = self.send(CoverEvent::Found {
            key: key.clone(),
            images,
        });
    }

    fn on_not_found(&self, key: &AlbumKey) {
        let _ = self.send(CoverEvent::NotFound(key.clone()));
    }
}

/// Identity comparison for listeners registered on the same lookup.
pub fn same_listener(left: &Arc<dyn CoverListener>, right: &Arc<dyn CoverListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}
