//! Model definition fetching

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::defaults::MODEL_FETCH_TIMEOUT_SECS;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned status {0}")]
    ServerError(reqwest::StatusCode),

    #[error("Cannot read {}: {source}", .path.display())]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unsupported model URI '{0}'")]
    UnsupportedScheme(String),
}

/// Retrieves the raw definition document behind a model URI.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<String, FetchError>;
}

/// Fetches `http(s)://` URIs with reqwest and reads `file://` URIs from disk.
#[derive(Clone)]
pub struct HttpModelFetcher {
    http: reqwest::Client,
}

impl HttpModelFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(MODEL_FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ModelFetcher for HttpModelFetcher {
    async fn fetch(&self, uri: &str) -> Result<String, FetchError> {
        if let Some(path) = uri.strip_prefix("file://") {
            let path = PathBuf::from(path);
            return tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| FetchError::File { path, source });
        }

        if !(uri.starts_with("http://") || uri.starts_with("https://")) {
            return Err(FetchError::UnsupportedScheme(uri.to_string()));
        }

        let resp = self.http.get(uri).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::ServerError(resp.status()));
        }
        Ok(resp.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_file_uris() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("model.json");
        std::fs::write(&path, "{}").expect("write");

        let fetcher = HttpModelFetcher::new().expect("client");
        let body = fetcher
            .fetch(&format!("file://{}", path.display()))
            .await
            .expect("fetches");
        assert_eq!(body, "{}");
    }

    #[tokio::test]
    async fn rejects_unknown_schemes_and_missing_files() {
        let fetcher = HttpModelFetcher::new().expect("client");
        assert!(matches!(
            fetcher.fetch("ftp://example.org/model").await,
            Err(FetchError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            fetcher.fetch("file:///definitely/not/here.json").await,
            Err(FetchError::File { .. })
        ));
    }
}
