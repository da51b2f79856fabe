use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;

use crate::repository::StorageError;

/// Read-only source of the static `data/**.json` documents.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the raw body at a path relative to the content root.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for missing documents and
    /// `StorageError::Network` for transport failures.
    async fn fetch_text(&self, path: &str) -> Result<String, StorageError>;
}

/// Fetch and decode a JSON document.
///
/// # Errors
///
/// Returns the source's error, or `StorageError::Serialization` if the body
/// is not the expected shape.
pub async fn fetch_json<T: DeserializeOwned>(
    source: &dyn ContentSource,
    path: &str,
) -> Result<T, StorageError> {
    let body = source.fetch_text(path).await?;
    serde_json::from_str(&body).map_err(|e| {
        tracing::warn!(path, error = %e, "content document failed to decode");
        StorageError::Serialization(format!("{path}: {e}"))
    })
}

/// Content served over HTTP from a base URL.
#[derive(Clone)]
pub struct HttpContentSource {
    client: reqwest::Client,
    base: Url,
}

impl HttpContentSource {
    #[must_use]
    pub fn new(client: reqwest::Client, base: Url) -> Self {
        Self { client, base }
    }

    fn url_for(&self, path: &str) -> Result<Url, StorageError> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch_text(&self, path: &str) -> Result<String, StorageError> {
        let url = self.url_for(path)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound);
        }
        if !status.is_success() {
            return Err(StorageError::Remote {
                code: status.as_u16().to_string(),
                message: format!("failed to load {path}"),
            });
        }
        response
            .text()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))
    }
}

/// Fixed set of documents held in memory, keyed by path.
#[derive(Clone, Default)]
pub struct StaticContentSource {
    documents: Arc<RwLock<HashMap<String, String>>>,
}

impl StaticContentSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(self, path: impl Into<String>, body: impl Into<String>) -> Self {
        self.insert(path, body);
        self
    }

    pub fn insert(&self, path: impl Into<String>, body: impl Into<String>) {
        if let Ok(mut guard) = self.documents.write() {
            guard.insert(path.into(), body.into());
        }
    }
}

#[async_trait]
impl ContentSource for StaticContentSource {
    async fn fetch_text(&self, path: &str) -> Result<String, StorageError> {
        let guard = self
            .documents
            .read()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .get(path.trim_start_matches('/'))
            .cloned()
            .ok_or(StorageError::NotFound)
    }
}
