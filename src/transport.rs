//! Byte transport for candidate cover locations.

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::Duration;

use log::debug;

const MAX_COVER_BYTES: u64 = 32 * 1024 * 1024;
const DEFAULT_USER_AGENT: &str = concat!("roqtune-covers/", env!("CARGO_PKG_VERSION"));

/// Fetches the raw bytes behind a location.
///
/// `Ok(None)` means the location answered but holds no cover; `Err` is an
/// I/O failure. Both are provider failures for the caller.
pub trait CoverTransport: Send + Sync {
    fn read_local(&self, path: &str) -> Result<Option<Vec<u8>>, String>;

    fn download(&self, url: &str) -> Result<Option<Vec<u8>>, String>;
}

/// Filesystem reads plus a blocking `ureq` agent for remote covers.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration, user_agent: Option<&str>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .redirects(1)
            .build();
        Self {
            agent,
            user_agent: user_agent
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(DEFAULT_USER_AGENT)
                .to_string(),
        }
    }

    fn status_means_exists(status: u16) -> bool {
        matches!(status, 200 | 302 | 307)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5), None)
    }
}

impl CoverTransport for HttpTransport {
    fn read_local(&self, path: &str) -> Result<Option<Vec<u8>>, String> {
        match fs::read(Path::new(path)) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(format!("failed to read {path}: {err}")),
        }
    }

    fn download(&self, url: &str) -> Result<Option<Vec<u8>>, String> {
        let response = match self
            .agent
            .get(url)
            .set("User-Agent", &self.user_agent)
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                debug!("Cover location {} answered {}", url, code);
                return Ok(None);
            }
            Err(err) => return Err(format!("request to {url} failed: {err}")),
        };
        if !Self::status_means_exists(response.status()) {
            debug!("Cover location {} answered {}", url, response.status());
            return Ok(None);
        }

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_COVER_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|err| format!("failed to read body of {url}: {err}"))?;
        Ok((!bytes.is_empty()).then_some(bytes))
    }
}
