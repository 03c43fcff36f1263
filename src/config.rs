//! Cover pipeline configuration model, defaults, and loading.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::blob_store::{BlobStore, FileBlobStore, MemoryBlobStore};
use crate::cover_manager::CoverManagerParts;
use crate::cover_request::CoverSizing;
use crate::image_pipeline::ImageCrateDecoder;
use crate::providers::{
    AlbumFolderProvider, CoverProvider, DiskCoverCache, ProviderList, ServerFolderProvider,
};
use crate::transport::HttpTransport;

/// Root configuration persisted to `covers.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CoversConfig {
    #[serde(default)]
    /// Where persisted state and cached covers live.
    pub storage: StorageConfig,
    #[serde(default)]
    /// HTTP client behavior.
    pub network: NetworkConfig,
    #[serde(default)]
    /// Decode bounds.
    pub sizing: SizingConfig,
    #[serde(default)]
    /// Which providers are enabled, in fixed order.
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    /// Directory for `covers.json` and `wrong-covers.json`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    /// Directory for cached cover PNGs.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Absent bounds mean native size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SizingConfig {
    #[serde(default)]
    pub cover_max_size: Option<u32>,
    #[serde(default)]
    pub cached_cover_max_size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub album_folder_enabled: bool,
    /// Root that album directory hints are relative to.
    #[serde(default)]
    pub music_root: Option<PathBuf>,
    /// File stems to look for in album folders, best first.
    #[serde(default)]
    pub album_folder_names: Vec<String>,
    #[serde(default)]
    pub server_enabled: bool,
    /// Supports `{artist}`, `{album}`, `{dir}` and `{file}`.
    #[serde(default)]
    pub server_url_template: String,
    /// Values substituted for `{file}`, best first.
    #[serde(default)]
    pub server_file_names: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            cache_enabled: true,
            cache_dir: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            user_agent: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join("roqtune").join("covers.toml"))
}

/// Reads `path`, falling back to defaults when it is missing or invalid.
pub fn load_config_file(path: &Path) -> CoversConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!("No cover config at {}, using defaults", path.display());
            return CoversConfig::default();
        }
        Err(err) => {
            warn!(
                "Failed to read cover config {}. Using defaults. error={}",
                path.display(),
                err
            );
            return CoversConfig::default();
        }
    };

    match toml::from_str::<CoversConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Failed to parse cover config {}. Using defaults. error={}",
                path.display(),
                err
            );
            CoversConfig::default()
        }
    }
}

impl CoversConfig {
    pub fn sizing(&self) -> CoverSizing {
        CoverSizing {
            cover_max_size: self.sizing.cover_max_size.filter(|size| *size > 0),
            cached_cover_max_size: self.sizing.cached_cover_max_size.filter(|size| *size > 0),
        }
    }

    fn cache_dir(&self) -> Option<PathBuf> {
        self.storage
            .cache_dir
            .clone()
            .or_else(DiskCoverCache::default_root)
    }

    /// Enabled providers in retry order: cache, album folder, music server.
    pub fn provider_list(&self) -> ProviderList {
        let mut entries: Vec<Arc<dyn CoverProvider>> = Vec::new();

        if self.storage.cache_enabled {
            match self.cache_dir() {
                Some(dir) => entries.push(Arc::new(DiskCoverCache::new(dir))),
                None => warn!("No cache directory available, cover cache disabled"),
            }
        }

        let providers = &self.providers;
        if providers.album_folder_enabled {
            match providers.music_root.clone() {
                Some(root) => entries.push(Arc::new(
                    AlbumFolderProvider::new(root).with_stems(providers.album_folder_names.clone()),
                )),
                None => warn!("Album folder covers enabled without a music_root, skipping"),
            }
        }

        if providers.server_enabled {
            if providers.server_url_template.trim().is_empty() {
                warn!("Server covers enabled without a server_url_template, skipping");
            } else {
                entries.push(Arc::new(
                    ServerFolderProvider::new(providers.server_url_template.clone())
                        .with_file_names(providers.server_file_names.clone()),
                ));
            }
        }

        ProviderList::new(entries)
    }

    /// File-backed state in `state_dir`, or in memory when no directory
    /// can be determined.
    pub fn blob_store(&self) -> Arc<dyn BlobStore> {
        match self.storage.state_dir.clone().or_else(FileBlobStore::default_root) {
            Some(root) => Arc::new(FileBlobStore::new(root)),
            None => {
                warn!("No state directory available, cover state will not persist");
                Arc::new(MemoryBlobStore::new())
            }
        }
    }

    pub fn transport(&self) -> HttpTransport {
        HttpTransport::new(
            Duration::from_millis(self.network.connect_timeout_ms),
            Duration::from_millis(self.network.read_timeout_ms),
            self.network.user_agent.as_deref(),
        )
    }

    pub fn manager_parts(&self) -> CoverManagerParts {
        CoverManagerParts {
            providers: self.provider_list(),
            transport: Arc::new(self.transport()),
            decoder: Arc::new(ImageCrateDecoder),
            blob_store: self.blob_store(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{load_config_file, CoversConfig};

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let config: CoversConfig = toml::from_str(
            r#"
            [sizing]
            cover_max_size = 512
            "#,
        )
        .expect("config should parse");

        assert!(config.storage.cache_enabled);
        assert_eq!(config.network.connect_timeout_ms, 5_000);
        assert_eq!(config.sizing().cover_max_size, Some(512));
        assert_eq!(config.sizing().cached_cover_max_size, None);
        assert!(!config.providers.server_enabled);
    }

    #[test]
    fn test_unparsable_file_loads_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("covers.toml");
        std::fs::write(&path, "[storage\ncache_enabled = ").expect("write config");
        assert_eq!(load_config_file(&path), CoversConfig::default());
        assert_eq!(
            load_config_file(&dir.path().join("missing.toml")),
            CoversConfig::default()
        );
    }

    #[test]
    fn test_provider_list_follows_fixed_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config: CoversConfig = toml::from_str(&format!(
            r#"
            [storage]
            cache_dir = "{cache}"

            [providers]
            album_folder_enabled = true
            music_root = "{music}"
            server_enabled = true
            server_url_template = "http://mpd.lan/music/{{dir}}/{{file}}"
            "#,
            cache = dir.path().join("cache").display(),
            music = dir.path().join("music").display(),
        ))
        .expect("config should parse");

        let providers = config.provider_list();
        let names: Vec<&str> = providers.iter().map(|provider| provider.name()).collect();
        assert_eq!(names, vec!["Cache", "Album folder", "Music server"]);
        assert_eq!(providers.cache_index(), Some(0));
    }

    #[test]
    fn test_incomplete_providers_are_skipped() {
        let config = CoversConfig {
            storage: super::StorageConfig {
                cache_enabled: false,
                ..Default::default()
            },
            providers: super::ProvidersConfig {
                album_folder_enabled: true,
                music_root: None,
                server_enabled: true,
                server_url_template: " ".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.provider_list().is_empty());
    }

    #[test]
    fn test_zero_bounds_mean_native_size() {
        let mut config = CoversConfig::default();
        config.sizing.cover_max_size = Some(0);
        assert_eq!(config.sizing().cover_max_size, None);
    }
}
