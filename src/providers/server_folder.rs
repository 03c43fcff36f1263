use super::CoverProvider;
use crate::album_key::AlbumKey;

const SERVER_PROVIDER_NAME: &str = "Music server";
const DEFAULT_COVER_FILE_NAMES: [&str; 3] = ["cover.jpg", "folder.jpg", "cover.png"];

/// Builds cover URLs on a music server that exposes the library over HTTP.
///
/// The template understands `{artist}`, `{album}`, `{dir}` and `{file}`.
/// `{dir}` keeps its slashes; every other value is percent-encoded.
#[derive(Debug, Clone)]
pub struct ServerFolderProvider {
    url_template: String,
    file_names: Vec<String>,
}

impl ServerFolderProvider {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            file_names: DEFAULT_COVER_FILE_NAMES
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }

    pub fn with_file_names(mut self, file_names: Vec<String>) -> Self {
        if !file_names.is_empty() {
            self.file_names = file_names;
        }
        self
    }

    fn encoded_dir(directory: &str) -> String {
        directory
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl CoverProvider for ServerFolderProvider {
    fn name(&self) -> &str {
        SERVER_PROVIDER_NAME
    }

    fn is_local_storage(&self) -> bool {
        false
    }

    fn is_available(&self) -> bool {
        !self.url_template.trim().is_empty()
    }

    fn resolve_locations(&self, key: &AlbumKey, directory: Option<&str>) -> Vec<String> {
        let needs_dir = self.url_template.contains("{dir}");
        let dir = match directory {
            Some(directory) => Self::encoded_dir(directory),
            None if needs_dir => return Vec::new(),
            None => String::new(),
        };
        let base = self
            .url_template
            .replace("{artist}", &urlencoding::encode(key.artist()))
            .replace("{album}", &urlencoding::encode(key.album()))
            .replace("{dir}", &dir);

        if !base.contains("{file}") {
            return vec![base];
        }
        self.file_names
            .iter()
            .map(|file| base.replace("{file}", &urlencoding::encode(file)))
            .collect()
    }
}
