//! PostgREST-compatible remote backend.
//!
//! Tables are reached under `/rest/v1/{table}`, RPC functions under
//! `/rest/v1/rpc/{name}` and avatar objects under `/storage/v1/object`.

use std::sync::{Arc, RwLock};

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::repository::{StorageError, Storage};

mod accounts;
mod progress;
mod resources;
mod rows;
mod tables;

const AVATAR_BUCKET: &str = "avatars";

/// Error body returned by the provider on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct RestRepository {
    client: reqwest::Client,
    base: Url,
    api_key: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl RestRepository {
    #[must_use]
    pub fn new(client: reqwest::Client, mut base: Url, api_key: impl Into<String>) -> Self {
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        Self {
            client,
            base,
            api_key: api_key.into(),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Replace the bearer token used for row-level security. `None` falls
    /// back to the anonymous key.
    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, StorageError> {
        self.base
            .join(path)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn table_url(&self, table: &str) -> Result<Url, StorageError> {
        self.endpoint(&format!("rest/v1/{table}"))
    }

    fn rpc_url(&self, function: &str) -> Result<Url, StorageError> {
        self.endpoint(&format!("rest/v1/rpc/{function}"))
    }

    fn object_url(&self, path: &str) -> Result<Url, StorageError> {
        self.endpoint(&format!("storage/v1/object/{AVATAR_BUCKET}/{path}"))
    }

    fn public_object_prefix(&self) -> String {
        format!(
            "{}storage/v1/object/public/{AVATAR_BUCKET}/",
            self.base.as_str()
        )
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let token = self
            .access_token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .unwrap_or_else(|| self.api_key.clone());
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
    }

    /// `GET` rows matching `filters`.
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(String, String)],
    ) -> Result<Vec<T>, StorageError> {
        let req = self
            .request(Method::GET, self.table_url(table)?)
            .query(&[("select", "*")])
            .query(filters);
        decode(send(req).await?).await
    }

    /// `GET` exactly one row; zero rows surface as `NotFound`.
    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(String, String)],
    ) -> Result<T, StorageError> {
        let req = self
            .request(Method::GET, self.table_url(table)?)
            .header("Accept", "application/vnd.pgrst.object+json")
            .query(&[("select", "*")])
            .query(filters);
        decode(send(req).await?).await
    }

    async fn insert<B: serde::Serialize + ?Sized>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<(), StorageError> {
        let req = self
            .request(Method::POST, self.table_url(table)?)
            .header("Prefer", "return=minimal")
            .json(body);
        send(req).await.map(drop)
    }

    async fn insert_returning<B, T>(&self, table: &str, body: &B) -> Result<T, StorageError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = self
            .request(Method::POST, self.table_url(table)?)
            .header("Prefer", "return=representation")
            .header("Accept", "application/vnd.pgrst.object+json")
            .json(body);
        decode(send(req).await?).await
    }

    async fn upsert<B: serde::Serialize + ?Sized>(
        &self,
        table: &str,
        on_conflict: &str,
        body: &B,
    ) -> Result<(), StorageError> {
        let req = self
            .request(Method::POST, self.table_url(table)?)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(&[("on_conflict", on_conflict)])
            .json(body);
        send(req).await.map(drop)
    }

    async fn update_returning<B, T>(
        &self,
        table: &str,
        filters: &[(String, String)],
        body: &B,
    ) -> Result<T, StorageError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = self
            .request(Method::PATCH, self.table_url(table)?)
            .header("Prefer", "return=representation")
            .header("Accept", "application/vnd.pgrst.object+json")
            .query(filters)
            .json(body);
        decode(send(req).await?).await
    }

    async fn delete(&self, table: &str, filters: &[(String, String)]) -> Result<(), StorageError> {
        let req = self
            .request(Method::DELETE, self.table_url(table)?)
            .query(filters);
        send(req).await.map(drop)
    }

    async fn rpc<B, T>(&self, function: &str, args: &B) -> Result<T, StorageError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = self
            .request(Method::POST, self.rpc_url(function)?)
            .json(args);
        decode(send(req).await?).await
    }
}

/// Send a request, turning transport failures and provider error bodies into
/// `StorageError`.
async fn send(req: RequestBuilder) -> Result<Response, StorageError> {
    let response = req
        .send()
        .await
        .map_err(|e| StorageError::Network(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let err = match serde_json::from_str::<ProviderError>(&body) {
        Ok(ProviderError {
            code: Some(code),
            message,
            error,
        }) => StorageError::from_provider(&code, message.or(error).unwrap_or_default()),
        _ if status == StatusCode::NOT_FOUND => StorageError::NotFound,
        _ => StorageError::Remote {
            code: status.as_u16().to_string(),
            message: body,
        },
    };
    tracing::debug!(status = status.as_u16(), error = %err, "provider request failed");
    Err(err)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StorageError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| StorageError::Network(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// `column=eq.value` filter pair.
fn eq(column: &str, value: impl std::fmt::Display) -> (String, String) {
    (column.to_string(), format!("eq.{value}"))
}

impl Storage {
    /// Build a `Storage` backed by a remote PostgREST endpoint.
    #[must_use]
    pub fn rest(repo: RestRepository) -> Self {
        Self {
            modules: Arc::new(repo.clone()),
            sections: Arc::new(repo.clone()),
            quiz_attempts: Arc::new(repo.clone()),
            profiles: Arc::new(repo.clone()),
            avatars: Arc::new(repo.clone()),
            favorites: Arc::new(repo.clone()),
            resource_views: Arc::new(repo.clone()),
            resource_analytics: Arc::new(repo.clone()),
            admin: Arc::new(repo),
        }
    }
}
