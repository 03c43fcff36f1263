//! Normalized artist/album identity used to key every cover lookup.

use std::fmt;
use std::hash::{Hash, Hasher};

const KEY_SEPARATOR: char = '\u{001f}';

/// Cover lookup identity.
///
/// The display `artist`/`album` strings are kept for providers that need the
/// original spelling, but equality and hashing only look at the normalized key.
#[derive(Debug, Clone)]
pub struct AlbumKey {
    artist: String,
    album: String,
    key: String,
}

impl AlbumKey {
    pub fn new(artist: impl Into<String>, album: impl Into<String>) -> Self {
        let artist = artist.into();
        let album = album.into();
        let key = format!(
            "{}{KEY_SEPARATOR}{}",
            normalize_component(&artist),
            normalize_component(&album)
        );
        Self {
            artist,
            album,
            key,
        }
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn album(&self) -> &str {
        &self.album
    }

    /// Comparable key, stable across runs and safe to persist.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Both artist and album must carry something besides whitespace.
    pub fn is_valid(&self) -> bool {
        !self.artist.trim().is_empty() && !self.album.trim().is_empty()
    }
}

impl PartialEq for AlbumKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for AlbumKey {}

impl Hash for AlbumKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for AlbumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.album)
    }
}

fn normalize_component(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
