//! Where playback audio comes from: local bytes or a remote URL

use crate::error::{MediaError, Result};
use std::path::Path;
use std::time::Duration;

/// Input accepted by `PlaybackSession::load`
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Bytes already in memory, named after the file they came from
    Bytes { name: String, data: Vec<u8> },
    /// Fetched with a plain GET
    Url(String),
}

impl AudioSource {
    /// Read a local file into memory
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| MediaError::Fetch(format!("Failed to read {:?}: {}", path, e)))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(AudioSource::Bytes { name, data })
    }

    /// Treat anything with an http(s) scheme as a URL, the rest as a path
    pub async fn from_arg(arg: &str) -> Result<Self> {
        if arg.starts_with("http://") || arg.starts_with("https://") {
            Ok(AudioSource::Url(arg.to_string()))
        } else {
            Self::from_file(arg).await
        }
    }

    /// Display name: file name, or the last URL path segment
    pub fn label(&self) -> String {
        match self {
            AudioSource::Bytes { name, .. } => name.clone(),
            AudioSource::Url(url) => url_label(url),
        }
    }
}

fn url_label(raw: &str) -> String {
    let Ok(url) = reqwest::Url::parse(raw) else {
        return raw.rsplit('/').find(|s| !s.is_empty()).unwrap_or(raw).to_string();
    };
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| s.to_string())
        .or_else(|| url.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| "Remote audio".to_string())
}

/// Build the client used for URL sources
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| MediaError::Fetch(format!("Failed to build HTTP client: {}", e)))
}

/// GET `url`, failing on transport errors and non-success statuses
pub async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| MediaError::Fetch(format!("{}: {}", url, e)))?;

    let response = response
        .error_for_status()
        .map_err(|e| MediaError::Fetch(format!("{}: {}", url, e)))?;

    let body = response
        .bytes()
        .await
        .map_err(|e| MediaError::Fetch(format!("{}: {}", url, e)))?;

    Ok(body.to_vec())
}
