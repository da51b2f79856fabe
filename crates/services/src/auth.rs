//! Session state delegated to the external auth provider, plus a small
//! persisted diagnostics log for sign-in troubleshooting.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use learnhub_core::model::{NewProfile, UserId};
use serde::{Deserialize, Serialize};
use storage::preferences::{AUTH_DEBUG_KEY, PreferenceStore, get_json, set_json};
use storage::repository::StorageError;
use thiserror::Error;

use crate::Clock;
use crate::error::{AdminError, ProfileServiceError, ProgressError, ResourceError};

/// Entries kept by [`AuthDebugLog`].
pub const MAX_AUTH_DEBUG_ENTRIES: usize = 50;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("not authenticated")]
pub struct NotAuthenticated;

impl From<NotAuthenticated> for ProgressError {
    fn from(_: NotAuthenticated) -> Self {
        Self::NotAuthenticated
    }
}

impl From<NotAuthenticated> for ProfileServiceError {
    fn from(_: NotAuthenticated) -> Self {
        Self::NotAuthenticated
    }
}

impl From<NotAuthenticated> for ResourceError {
    fn from(_: NotAuthenticated) -> Self {
        Self::NotAuthenticated
    }
}

impl From<NotAuthenticated> for AdminError {
    fn from(_: NotAuthenticated) -> Self {
        Self::NotAuthenticated
    }
}

/// The signed-in user as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl SessionUser {
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            full_name: None,
            name: None,
            avatar_url: None,
        }
    }

    #[must_use]
    pub fn with_full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    /// Profile to create the first time this user is seen.
    #[must_use]
    pub fn new_profile(&self) -> NewProfile {
        NewProfile::from_metadata(
            self.id,
            self.email.clone(),
            self.full_name.as_deref(),
            self.name.as_deref(),
            self.avatar_url.as_deref(),
        )
    }
}

/// Tokens carried in an OAuth redirect fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl CallbackTokens {
    /// Extract both tokens from a URL fragment such as
    /// `#/callback#access_token=..&refresh_token=..`. Returns `None` unless
    /// both are present and non-empty.
    #[must_use]
    pub fn from_fragment(fragment: &str) -> Option<Self> {
        let find = |name: &str| {
            fragment
                .split(['#', '&', '?'])
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
                .filter(|value| !value.is_empty())
        };
        Some(Self {
            access_token: find("access_token")?,
            refresh_token: find("refresh_token")?,
        })
    }
}

/// Current session, shared by every service.
#[derive(Default)]
pub struct AuthState {
    user: RwLock<Option<SessionUser>>,
    debug: Option<AuthDebugLog>,
}

impl AuthState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_debug_log(debug: AuthDebugLog) -> Self {
        Self {
            user: RwLock::new(None),
            debug: Some(debug),
        }
    }

    pub fn sign_in(&self, user: SessionUser) {
        self.debug_log(
            "User signed in",
            serde_json::json!({ "userEmail": user.email }),
        );
        tracing::info!(user = %user.id, "session started");
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    pub fn sign_out(&self) {
        let previous = self
            .user
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(user) = previous {
            tracing::info!(user = %user.id, "session ended");
            self.debug_log("User signed out", serde_json::Value::Null);
        }
    }

    #[must_use]
    pub fn current_user(&self) -> Option<SessionUser> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    /// # Errors
    ///
    /// Returns `NotAuthenticated` when nobody is signed in.
    pub fn require_user(&self) -> Result<SessionUser, NotAuthenticated> {
        self.current_user().ok_or(NotAuthenticated)
    }

    #[must_use]
    pub fn debug(&self) -> Option<&AuthDebugLog> {
        self.debug.as_ref()
    }

    fn debug_log(&self, message: &str, data: serde_json::Value) {
        if let Some(debug) = &self.debug {
            if let Err(err) = debug.log(message, data) {
                tracing::warn!(error = %err, "auth debug log unavailable");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthDebugEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Newest-first ring buffer of auth events kept in the preference store.
#[derive(Clone)]
pub struct AuthDebugLog {
    prefs: Arc<dyn PreferenceStore>,
    clock: Clock,
}

impl AuthDebugLog {
    #[must_use]
    pub fn new(prefs: Arc<dyn PreferenceStore>, clock: Clock) -> Self {
        Self { prefs, clock }
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the preference store cannot be written.
    pub fn log(&self, message: &str, data: serde_json::Value) -> Result<(), StorageError> {
        tracing::debug!(event = message, %data, "auth debug");
        let mut entries = self.entries()?;
        entries.insert(
            0,
            AuthDebugEntry {
                timestamp: self.clock.now(),
                message: message.to_string(),
                data,
            },
        );
        entries.truncate(MAX_AUTH_DEBUG_ENTRIES);
        set_json(self.prefs.as_ref(), AUTH_DEBUG_KEY, &entries)
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the preference store cannot be read.
    pub fn entries(&self) -> Result<Vec<AuthDebugEntry>, StorageError> {
        Ok(get_json(self.prefs.as_ref(), AUTH_DEBUG_KEY)?.unwrap_or_default())
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the preference store cannot be written.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.prefs.remove(AUTH_DEBUG_KEY)
    }
}
