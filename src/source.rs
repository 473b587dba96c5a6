use crate::error::{Result, SearchError};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Resolves an image reference (HTTP(S) URL or local path) to raw bytes
pub trait ImageSource: Send + Sync {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>>;
}

/// True when the reference should be fetched over the network
pub fn is_remote(reference: &str) -> bool {
    let lower = reference.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Repair a doubled scheme such as `https:https://host/a.jpg` -> `https://host/a.jpg`.
///
/// Catalog exports occasionally prefix an already absolute URL with a scheme;
/// the outer scheme is kept.
pub fn clean_url(url: &str) -> String {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();

    let outer = if lower.starts_with("https:") {
        "https:".len()
    } else if lower.starts_with("http:") {
        "http:".len()
    } else {
        return url.to_string();
    };

    let rest = &lower[outer..];
    let inner = if rest.starts_with("https://") {
        "https://".len()
    } else if rest.starts_with("http://") {
        "http://".len()
    } else {
        return url.to_string();
    };

    format!("{}//{}", &url[..outer], &url[outer + inner..])
}

/// Fetches remote images with a bounded timeout and reads local paths from disk
pub struct HttpImageSource {
    http: reqwest::blocking::Client,
    timeout: Duration,
}

impl HttpImageSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, timeout })
    }

    fn fetch_remote(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url = %url, timeout_secs = self.timeout.as_secs(), "Downloading image");

        let response = self
            .http
            .get(url)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::SourceUnavailable(format!(
                        "Timed out after {}s fetching {}",
                        self.timeout.as_secs(),
                        url
                    ))
                } else {
                    SearchError::SourceUnavailable(format!("HTTP request failed: {}", e))
                }
            })?
            .error_for_status()
            .map_err(|e| SearchError::SourceUnavailable(format!("HTTP status error: {}", e)))?;

        let body = response
            .bytes()
            .map_err(|e| SearchError::SourceUnavailable(format!("Failed to read response: {}", e)))?;

        Ok(body.to_vec())
    }

    fn fetch_local(path: &Path) -> Result<Vec<u8>> {
        debug!(path = %path.display(), "Reading local image");
        std::fs::read(path).map_err(|e| {
            SearchError::SourceUnavailable(format!("Cannot read {}: {}", path.display(), e))
        })
    }
}

impl ImageSource for HttpImageSource {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SearchError::InvalidArgument(
                "image_url must not be empty".to_string(),
            ));
        }

        if is_remote(reference) {
            self.fetch_remote(&clean_url(reference))
        } else {
            Self::fetch_local(Path::new(reference))
        }
    }
}
