use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::repository::StorageError;

/// Guest-mode progress snapshot.
pub const PROGRESS_KEY: &str = "claudeLearnProgress";
/// Last-seen content versions.
pub const LAST_SEEN_KEY: &str = "claudeLearnLastSeen";
/// `dark` or `light`.
pub const THEME_KEY: &str = "theme";
/// Ring buffer of auth diagnostics.
pub const AUTH_DEBUG_KEY: &str = "claude-learn-auth-debug";

/// Small string key/value store for device-local preferences.
pub trait PreferenceStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be persisted.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be removed.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Read a JSON-encoded preference. Unparseable values are treated as absent.
///
/// # Errors
///
/// Returns `StorageError` if the store itself fails.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn PreferenceStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            tracing::warn!(key, error = %err, "discarding unparseable preference");
            Ok(None)
        }
    }
}

/// # Errors
///
/// Returns `StorageError::Serialization` if `value` cannot be encoded, or the
/// store's error if it cannot be written.
pub fn set_json<T: Serialize>(
    store: &dyn PreferenceStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    store.set(key, &raw)
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[derive(Clone, Default)]
pub struct InMemoryPreferences {
    values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl InMemoryPreferences {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self.values.lock().map_err(poisoned)?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self.values.lock().map_err(poisoned)?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.values.lock().map_err(poisoned)?;
        guard.remove(key);
        Ok(())
    }
}

/// Preferences persisted as a single JSON object on disk.
///
/// The file is rewritten in full after every change.
#[derive(Clone)]
pub struct JsonFilePreferences {
    path: PathBuf,
    values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl JsonFilePreferences {
    /// Open (or lazily create) the preference file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the file exists but cannot be read,
    /// or `StorageError::Serialization` if it is not a JSON string map.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::Connection(e.to_string())),
        };
        Ok(Self {
            path,
            values: Arc::new(Mutex::new(values)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(values)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::Connection(e.to_string()))?;
        }
        fs::write(&self.path, raw).map_err(|e| StorageError::Connection(e.to_string()))
    }
}

impl PreferenceStore for JsonFilePreferences {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self.values.lock().map_err(poisoned)?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self.values.lock().map_err(poisoned)?;
        guard.insert(key.to_string(), value.to_string());
        self.flush(&guard)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.values.lock().map_err(poisoned)?;
        if guard.remove(key).is_some() {
            self.flush(&guard)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_helpers_skip_garbage() {
        let store = InMemoryPreferences::new();
        store.set(THEME_KEY, "{not json").unwrap();
        assert_eq!(get_json::<Vec<u32>>(&store, THEME_KEY).unwrap(), None);

        set_json(&store, THEME_KEY, &vec![1_u32, 2]).unwrap();
        assert_eq!(get_json::<Vec<u32>>(&store, THEME_KEY).unwrap(), Some(vec![1, 2]));
    }

    #[test]
    fn file_preferences_survive_reopen() {
        let path = std::env::temp_dir().join(format!("learnhub-prefs-{}.json", uuid::Uuid::new_v4()));
        {
            let prefs = JsonFilePreferences::open(&path).unwrap();
            prefs.set(THEME_KEY, "dark").unwrap();
            prefs.set(LAST_SEEN_KEY, "{}").unwrap();
            prefs.remove(LAST_SEEN_KEY).unwrap();
        }
        let reopened = JsonFilePreferences::open(&path).unwrap();
        assert_eq!(reopened.get(THEME_KEY).unwrap().as_deref(), Some("dark"));
        assert_eq!(reopened.get(LAST_SEEN_KEY).unwrap(), None);
        let _ = fs::remove_file(&path);
    }
}
