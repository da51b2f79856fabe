use std::sync::Arc;

use learnhub_core::model::{BackendSettings, ProgressScope, UserId};
use storage::content::{ContentSource, HttpContentSource, StaticContentSource};
use storage::preferences::{InMemoryPreferences, JsonFilePreferences, PreferenceStore};
use storage::repository::{Storage, StorageError};
use storage::rest::RestRepository;

use crate::Clock;
use crate::admin_service::AdminService;
use crate::auth::{AuthDebugLog, AuthState, SessionUser};
use crate::catalog_service::CatalogService;
use crate::config::LearnHubConfig;
use crate::error::{AppServicesError, ProgressError};
use crate::notifications::Notifier;
use crate::profile_service::ProfileService;
use crate::progress::{LocalProgressTracker, ProgressAggregator, ProgressConfig, ProgressRepos};
use crate::resource_service::{ResourceRepos, ResourceService};
use crate::theme_service::ThemeService;
use crate::update_service::UpdateService;

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    clock: Clock,
    settings: BackendSettings,
    storage: Storage,
    rest: Option<RestRepository>,
    prefs: Arc<dyn PreferenceStore>,
    auth: Arc<AuthState>,
    notifier: Arc<Notifier>,
    profiles: Arc<ProfileService>,
    resources: Arc<ResourceService>,
    admin: Arc<AdminService>,
    catalog: Arc<CatalogService>,
    updates: Arc<UpdateService>,
}

impl AppServices {
    /// Build from `LEARNHUB_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Settings` for invalid variables, otherwise
    /// the errors of [`AppServices::from_config`].
    pub fn from_env(clock: Clock) -> Result<Self, AppServicesError> {
        let config = LearnHubConfig::from_env()?;
        Self::from_config(&config, clock)
    }

    /// Remote backend when an API URL and key are configured, otherwise an
    /// in-memory backend for guest sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the HTTP client or the preference file
    /// cannot be set up.
    pub fn from_config(config: &LearnHubConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let client = http_client()?;
        let prefs = open_prefs(config)?;
        let content = content_source(&config.backend, &client);

        match (config.backend.api_url(), config.backend.api_key()) {
            (Some(url), Some(key)) => {
                let rest = RestRepository::new(client, url.clone(), key);
                rest.set_access_token(config.backend.access_token().map(str::to_string));
                tracing::info!(api = %url, "using remote backend");
                Ok(Self::assemble(
                    Storage::rest(rest.clone()),
                    Some(rest),
                    prefs,
                    content,
                    config.backend.clone(),
                    clock,
                ))
            }
            _ => {
                tracing::info!("no remote backend configured; progress stays in memory");
                Ok(Self::assemble(
                    Storage::in_memory(),
                    None,
                    prefs,
                    content,
                    config.backend.clone(),
                    clock,
                ))
            }
        }
    }

    /// Build services backed by a local `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        config: &LearnHubConfig,
        clock: Clock,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        let client = http_client()?;
        let prefs = open_prefs(config)?;
        let content = content_source(&config.backend, &client);
        Ok(Self::assemble(
            storage,
            None,
            prefs,
            content,
            config.backend.clone(),
            clock,
        ))
    }

    /// Wire services over explicit parts.
    #[must_use]
    pub fn from_parts(
        storage: Storage,
        prefs: Arc<dyn PreferenceStore>,
        content: Arc<dyn ContentSource>,
        settings: BackendSettings,
        clock: Clock,
    ) -> Self {
        Self::assemble(storage, None, prefs, content, settings, clock)
    }

    fn assemble(
        storage: Storage,
        rest: Option<RestRepository>,
        prefs: Arc<dyn PreferenceStore>,
        content: Arc<dyn ContentSource>,
        settings: BackendSettings,
        clock: Clock,
    ) -> Self {
        let notifier = Arc::new(Notifier::new(clock));
        let auth = Arc::new(AuthState::with_debug_log(AuthDebugLog::new(
            Arc::clone(&prefs),
            clock,
        )));

        let profiles = Arc::new(ProfileService::new(
            clock,
            Arc::clone(&auth),
            Arc::clone(&storage.profiles),
            Arc::clone(&storage.avatars),
            Arc::clone(&notifier),
        ));
        let resources = Arc::new(ResourceService::new(
            clock,
            Arc::clone(&auth),
            Arc::clone(&content),
            ResourceRepos {
                favorites: Arc::clone(&storage.favorites),
                views: Arc::clone(&storage.resource_views),
                analytics: Arc::clone(&storage.resource_analytics),
            },
            Arc::clone(&notifier),
        ));
        let admin = Arc::new(AdminService::new(
            clock,
            Arc::clone(&auth),
            Arc::clone(&storage.profiles),
            Arc::clone(&storage.admin),
            ProgressRepos::from_storage(&storage),
            ProgressScope::Global,
        ));
        let catalog = Arc::new(CatalogService::new(Arc::clone(&content)));
        let updates = Arc::new(UpdateService::new(content, Arc::clone(&prefs), clock));

        Self {
            clock,
            settings,
            storage,
            rest,
            prefs,
            auth,
            notifier,
            profiles,
            resources,
            admin,
            catalog,
            updates,
        }
    }

    //
    // ─── SESSION ───────────────────────────────────────────────────────────────
    //

    /// Start a session. `access_token` authorizes remote row access.
    pub fn sign_in(&self, user: SessionUser, access_token: Option<String>) {
        if let Some(rest) = &self.rest {
            rest.set_access_token(access_token);
        }
        self.auth.sign_in(user);
    }

    /// End the session and forget per-user caches.
    pub fn sign_out(&self) {
        self.auth.sign_out();
        self.profiles.clear();
        self.notifier.clear();
        if let Some(rest) = &self.rest {
            rest.set_access_token(None);
        }
    }

    /// Progress aggregator for `user` within `scope`, graded with the
    /// configured threshold for that scope.
    #[must_use]
    pub fn aggregator_for(&self, user: UserId, scope: ProgressScope) -> ProgressAggregator {
        ProgressAggregator::new(
            user,
            scope.clone(),
            ProgressRepos::from_storage(&self.storage),
            Arc::clone(&self.notifier),
            ProgressConfig::for_scope(&scope, &self.settings, self.clock),
        )
    }

    /// Aggregator for the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotAuthenticated` when nobody is signed in.
    pub fn session_progress(&self, scope: ProgressScope) -> Result<ProgressAggregator, ProgressError> {
        let user = self.auth.require_user()?;
        Ok(self.aggregator_for(user.id, scope))
    }

    /// Device-local progress for guests.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the preference store fails.
    pub fn local_progress(&self) -> Result<LocalProgressTracker, ProgressError> {
        Ok(LocalProgressTracker::open(Arc::clone(&self.prefs), self.clock)?
            .with_threshold(self.settings.global_pass()))
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the preference store cannot be read.
    pub fn theme(&self, system_prefers_dark: bool) -> Result<ThemeService, StorageError> {
        ThemeService::open(Arc::clone(&self.prefs), system_prefers_dark)
    }

    //
    // ─── ACCESSORS ─────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    #[must_use]
    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn auth(&self) -> Arc<AuthState> {
        Arc::clone(&self.auth)
    }

    #[must_use]
    pub fn notifier(&self) -> Arc<Notifier> {
        Arc::clone(&self.notifier)
    }

    #[must_use]
    pub fn profiles(&self) -> Arc<ProfileService> {
        Arc::clone(&self.profiles)
    }

    #[must_use]
    pub fn resources(&self) -> Arc<ResourceService> {
        Arc::clone(&self.resources)
    }

    #[must_use]
    pub fn admin(&self) -> Arc<AdminService> {
        Arc::clone(&self.admin)
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<CatalogService> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn updates(&self) -> Arc<UpdateService> {
        Arc::clone(&self.updates)
    }
}

fn http_client() -> Result<reqwest::Client, AppServicesError> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("learnhub/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

fn open_prefs(config: &LearnHubConfig) -> Result<Arc<dyn PreferenceStore>, AppServicesError> {
    Ok(match &config.prefs_path {
        Some(path) => Arc::new(JsonFilePreferences::open(path)?),
        None => Arc::new(InMemoryPreferences::new()),
    })
}

fn content_source(settings: &BackendSettings, client: &reqwest::Client) -> Arc<dyn ContentSource> {
    match settings.content_url() {
        Some(base) => Arc::new(HttpContentSource::new(client.clone(), base.clone())),
        None => Arc::new(StaticContentSource::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnhub_core::time::fixed_now;

    fn services() -> AppServices {
        AppServices::from_parts(
            Storage::in_memory(),
            Arc::new(InMemoryPreferences::new()),
            Arc::new(StaticContentSource::new()),
            BackendSettings::default(),
            Clock::fixed(fixed_now()),
        )
    }

    #[test]
    fn session_progress_requires_sign_in() {
        let app = services();
        assert!(matches!(
            app.session_progress(ProgressScope::Global),
            Err(ProgressError::NotAuthenticated)
        ));

        let user = UserId::random();
        app.sign_in(SessionUser::new(user, "a@b.c"), None);
        let progress = app.session_progress(ProgressScope::Global).unwrap();
        assert_eq!(progress.user(), user);
        assert_eq!(progress.pass_threshold(), app.settings().global_pass());

        app.sign_out();
        assert!(!app.auth().is_authenticated());
    }

    #[test]
    fn course_scope_uses_course_threshold() {
        let app = services();
        let scope = ProgressScope::course(
            learnhub_core::model::CategorySlug::new("software-dev"),
            learnhub_core::model::CourseId::new("claude-code-training"),
        );
        let progress = app.aggregator_for(UserId::random(), scope);
        assert_eq!(progress.pass_threshold(), app.settings().course_pass());
    }

    #[test]
    fn auth_events_reach_the_debug_log() {
        let app = services();
        app.sign_in(SessionUser::new(UserId::random(), "a@b.c"), None);
        let entries = app.auth().debug().unwrap().entries().unwrap();
        assert_eq!(entries[0].message, "User signed in");
    }
}
