//! Shared error types for the services crate.

use thiserror::Error;

use learnhub_core::model::{ProfileError, QuizError, SettingsError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `ProgressAggregator` and `LocalProgressTracker`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("sign in to track progress")]
    NotAuthenticated,
    #[error("progress record not found")]
    NotFound,
    #[error(transparent)]
    Validation(#[from] QuizError),
    #[error("progress data could not be read: {0}")]
    Serialization(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ProfileService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProfileServiceError {
    #[error("sign in to manage your profile")]
    NotAuthenticated,
    #[error("profile not found")]
    NotFound,
    #[error(transparent)]
    Validation(#[from] ProfileError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ResourceService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResourceError {
    #[error("sign in to save favorites and history")]
    NotAuthenticated,
    #[error("resource not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `AdminService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdminError {
    #[error("sign in to view admin data")]
    NotAuthenticated,
    #[error("access denied: admin privileges required")]
    AccessDenied,
    #[error("user not found")]
    NotFound,
    #[error("admin export failed: {0}")]
    Serialization(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `CatalogService` and `UpdateService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("http client could not be built: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<serde_json::Error> for ProgressError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for AdminError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
