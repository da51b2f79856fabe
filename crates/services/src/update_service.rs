use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use learnhub_core::model::{LastSeenVersions, ModuleId, VersionManifest, is_newer_version};
use serde::Serialize;
use storage::content::{ContentSource, fetch_json};
use storage::preferences::{LAST_SEEN_KEY, PreferenceStore, get_json, set_json};
use storage::repository::StorageError;

use crate::Clock;
use crate::error::CatalogError;

const MANIFEST_PATH: &str = "data/version.json";
/// Version recorded for monthly modules, which are not versioned themselves.
const UNVERSIONED_SEEN: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Updated,
}

/// A module that changed since the learner last looked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleChange {
    pub id: ModuleId,
    pub kind: ChangeKind,
    pub title: Option<String>,
    pub version: Option<String>,
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdatesSinceLastVisit {
    pub modules: Vec<ModuleChange>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleUpdateInfo {
    pub version: String,
    pub last_updated: Option<String>,
    pub changes: Vec<String>,
    pub is_new: bool,
    pub is_updated: bool,
}

#[derive(Default)]
struct UpdateState {
    manifest: Option<VersionManifest>,
    seen: LastSeenVersions,
    has_new_updates: bool,
}

impl UpdateState {
    fn is_module_new(&self, module: &ModuleId) -> bool {
        self.manifest
            .as_ref()
            .and_then(|m| m.monthly_update(module))
            .is_some_and(|_| !self.seen.module_versions.contains_key(module))
    }

    fn is_module_updated(&self, module: &ModuleId) -> bool {
        let Some(update) = self
            .manifest
            .as_ref()
            .and_then(|m| m.module_updates.get(module))
        else {
            return false;
        };
        self.seen
            .module_versions
            .get(module)
            .is_some_and(|seen| is_newer_version(&update.version, Some(seen)))
    }
}

/// Tracks which content the learner has already seen, against the published
/// `data/version.json`.
pub struct UpdateService {
    content: Arc<dyn ContentSource>,
    prefs: Arc<dyn PreferenceStore>,
    clock: Clock,
    state: RwLock<UpdateState>,
}

impl UpdateService {
    #[must_use]
    pub fn new(content: Arc<dyn ContentSource>, prefs: Arc<dyn PreferenceStore>, clock: Clock) -> Self {
        Self {
            content,
            prefs,
            clock,
            state: RwLock::new(UpdateState::default()),
        }
    }

    /// Fetch the manifest and the stored last-seen versions.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Storage` if the manifest or the preference
    /// store cannot be read. Without a manifest nothing counts as new.
    pub async fn load(&self) -> Result<(), CatalogError> {
        let manifest = fetch_json::<VersionManifest>(self.content.as_ref(), MANIFEST_PATH).await;
        let seen: LastSeenVersions =
            get_json(self.prefs.as_ref(), LAST_SEEN_KEY)?.unwrap_or_default();

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.seen = seen;
        match manifest {
            Ok(manifest) => {
                state.has_new_updates = is_newer_version(
                    &manifest.content_version,
                    state.seen.content_version.as_deref(),
                );
                tracing::debug!(
                    version = %manifest.content_version,
                    has_new_updates = state.has_new_updates,
                    "content manifest loaded"
                );
                state.manifest = Some(manifest);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "content manifest unavailable");
                state.manifest = None;
                state.has_new_updates = false;
                Err(err.into())
            }
        }
    }

    #[must_use]
    pub fn manifest(&self) -> Option<VersionManifest> {
        self.read().manifest.clone()
    }

    /// Whether the published content version is newer than the last one seen.
    #[must_use]
    pub fn has_new_updates(&self) -> bool {
        self.read().has_new_updates
    }

    /// A monthly module the learner has never opened.
    #[must_use]
    pub fn is_module_new(&self, module: &ModuleId) -> bool {
        self.read().is_module_new(module)
    }

    /// A versioned module seen before, at an older version.
    #[must_use]
    pub fn is_module_updated(&self, module: &ModuleId) -> bool {
        self.read().is_module_updated(module)
    }

    #[must_use]
    pub fn module_update_info(&self, module: &ModuleId) -> Option<ModuleUpdateInfo> {
        let state = self.read();
        let update = state.manifest.as_ref()?.module_updates.get(module)?;
        Some(ModuleUpdateInfo {
            version: update.version.clone(),
            last_updated: update.last_updated.clone(),
            changes: update.changes.clone(),
            is_new: state.is_module_new(module),
            is_updated: state.is_module_updated(module),
        })
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the preference store rejects the write.
    pub fn mark_module_seen(&self, module: &ModuleId) -> Result<(), StorageError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let version = state
            .manifest
            .as_ref()
            .and_then(|m| m.module_updates.get(module))
            .map_or_else(|| UNVERSIONED_SEEN.to_string(), |u| u.version.clone());
        state.seen.module_versions.insert(module.clone(), version);
        self.persist(&state)
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the preference store rejects the write.
    pub fn mark_all_seen(&self) -> Result<(), StorageError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let UpdateState { manifest, seen, .. } = &mut *state;
        seen.content_version = Some(
            manifest
                .as_ref()
                .map_or_else(|| "1.0.0".to_string(), |m| m.content_version.clone()),
        );
        if let Some(manifest) = manifest {
            for (id, update) in &manifest.module_updates {
                seen.module_versions.insert(id.clone(), update.version.clone());
            }
            for update in &manifest.monthly_updates {
                seen.module_versions
                    .insert(update.id.clone(), UNVERSIONED_SEEN.to_string());
            }
        }
        state.has_new_updates = false;
        self.persist(&state)
    }

    /// Updated versioned modules, then unseen monthly modules with their
    /// feature lists.
    #[must_use]
    pub fn updates_since_last_visit(&self) -> UpdatesSinceLastVisit {
        let state = self.read();
        let Some(manifest) = state.manifest.as_ref() else {
            return UpdatesSinceLastVisit::default();
        };

        let mut updates = UpdatesSinceLastVisit::default();
        for (id, update) in &manifest.module_updates {
            if state.is_module_updated(id) {
                updates.modules.push(ModuleChange {
                    id: id.clone(),
                    kind: ChangeKind::Updated,
                    title: None,
                    version: Some(update.version.clone()),
                    changes: update.changes.clone(),
                });
            }
        }
        for monthly in &manifest.monthly_updates {
            if !state.seen.module_versions.contains_key(&monthly.id) {
                updates.modules.push(ModuleChange {
                    id: monthly.id.clone(),
                    kind: ChangeKind::New,
                    title: monthly.title.clone(),
                    version: None,
                    changes: Vec::new(),
                });
                updates.features.extend(monthly.features.iter().cloned());
            }
        }
        updates
    }

    #[must_use]
    pub fn should_show_whats_new(&self) -> bool {
        self.has_new_updates() && !self.updates_since_last_visit().modules.is_empty()
    }

    fn persist(&self, state: &UpdateState) -> Result<(), StorageError> {
        let stored = LastSeenVersions {
            content_version: Some(
                state
                    .manifest
                    .as_ref()
                    .map_or_else(|| "0.0.0".to_string(), |m| m.content_version.clone()),
            ),
            module_versions: state.seen.module_versions.clone(),
            last_checked: Some(self.clock.now()),
        };
        set_json(self.prefs.as_ref(), LAST_SEEN_KEY, &stored)
    }

    fn read(&self) -> RwLockReadGuard<'_, UpdateState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}
