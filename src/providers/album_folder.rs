use std::path::{Path, PathBuf};

use super::CoverProvider;
use crate::album_key::AlbumKey;

const ALBUM_FOLDER_PROVIDER_NAME: &str = "Album folder";
const DEFAULT_COVER_STEMS: [&str; 5] = ["cover", "front", "folder", "album", "art"];
const COVER_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Finds cover images sitting next to the album's audio files.
#[derive(Debug, Clone)]
pub struct AlbumFolderProvider {
    music_root: PathBuf,
    stems: Vec<String>,
}

impl AlbumFolderProvider {
    pub fn new(music_root: PathBuf) -> Self {
        Self {
            music_root,
            stems: DEFAULT_COVER_STEMS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_stems(mut self, stems: Vec<String>) -> Self {
        if !stems.is_empty() {
            self.stems = stems
                .into_iter()
                .map(|stem| stem.to_ascii_lowercase())
                .collect();
        }
        self
    }

    fn stem_rank(&self, path: &Path) -> Option<usize> {
        let stem = path.file_stem()?.to_str()?.to_ascii_lowercase();
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        if !COVER_EXTENSIONS.contains(&extension.as_str()) {
            return None;
        }
        self.stems.iter().position(|candidate| *candidate == stem)
    }
}

impl CoverProvider for AlbumFolderProvider {
    fn name(&self) -> &str {
        ALBUM_FOLDER_PROVIDER_NAME
    }

    fn is_local_storage(&self) -> bool {
        true
    }

    fn resolve_locations(&self, _key: &AlbumKey, directory: Option<&str>) -> Vec<String> {
        let Some(directory) = directory else {
            return Vec::new();
        };
        let album_dir = self.music_root.join(directory.trim_start_matches('/'));
        let Ok(entries) = std::fs::read_dir(&album_dir) else {
            return Vec::new();
        };

        let mut found: Vec<(usize, PathBuf)> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| self.stem_rank(&path).map(|rank| (rank, path)))
            .collect();
        // Stem preference first, then file name for a deterministic order.
        found.sort();
        found
            .into_iter()
            .map(|(_, path)| path.to_string_lossy().into_owned())
            .collect()
    }
}
