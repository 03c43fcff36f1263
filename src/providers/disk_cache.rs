use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use image::DynamicImage;
use log::{debug, warn};

use super::{CoverProvider, CoverStore};
use crate::album_key::AlbumKey;
use crate::image_pipeline::save_png_atomic;

const CACHE_PROVIDER_NAME: &str = "Cache";

/// On-disk cover cache: one PNG per identity.
#[derive(Debug, Clone)]
pub struct DiskCoverCache {
    root: PathBuf,
}

impl DiskCoverCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn default_root() -> Option<PathBuf> {
        dirs::cache_dir().map(|path| path.join("roqtune").join("covers").join("original"))
    }

    pub fn cover_path(&self, key: &AlbumKey) -> PathBuf {
        let stem = format!("{:x}", md5::compute(key.key().as_bytes()));
        self.root.join(format!("{stem}.png"))
    }
}

impl CoverProvider for DiskCoverCache {
    fn name(&self) -> &str {
        CACHE_PROVIDER_NAME
    }

    fn is_local_storage(&self) -> bool {
        true
    }

    fn resolve_locations(&self, key: &AlbumKey, _directory: Option<&str>) -> Vec<String> {
        let path = self.cover_path(key);
        if path.is_file() {
            vec![path.to_string_lossy().into_owned()]
        } else {
            Vec::new()
        }
    }

    fn cover_store(&self) -> Option<&dyn CoverStore> {
        Some(self)
    }
}

impl CoverStore for DiskCoverCache {
    fn save(&self, key: &AlbumKey, image: &DynamicImage) -> Result<PathBuf, String> {
        let path = self.cover_path(key);
        save_png_atomic(image, &path)?;
        debug!("Cached cover for {} at {}", key, path.display());
        Ok(path)
    }

    fn delete(&self, key: &AlbumKey) -> Result<(), String> {
        let path = self.cover_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(format!("failed to delete {}: {err}", path.display())),
        }
    }

    fn clear(&self) -> usize {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return 0,
            Err(err) => {
                warn!("Cannot list cover cache {}: {}", self.root.display(), err);
                return 0;
            }
        };
        let mut deleted = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if fs::remove_file(&path).is_ok() {
                deleted = deleted.saturating_add(1);
            }
        }
        deleted
    }
}
