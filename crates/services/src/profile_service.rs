use std::sync::{Arc, PoisonError, RwLock};

use learnhub_core::model::{AvatarUpload, Profile, ProfileUpdate};
use rand::Rng;
use rand::distr::Alphanumeric;
use storage::repository::{AvatarStore, ProfileRepository, StorageError};

use crate::Clock;
use crate::auth::{AuthState, SessionUser};
use crate::error::ProfileServiceError;
use crate::notifications::Notifier;

const AVATAR_DIR: &str = "avatars";
const AVATAR_SUFFIX_LEN: usize = 9;

/// Loads, creates and edits the signed-in user's profile.
///
/// The last profile read or written is cached so views can ask for the
/// display name without another round trip.
pub struct ProfileService {
    auth: Arc<AuthState>,
    profiles: Arc<dyn ProfileRepository>,
    avatars: Arc<dyn AvatarStore>,
    notifier: Arc<Notifier>,
    clock: Clock,
    cached: RwLock<Option<Profile>>,
}

impl ProfileService {
    #[must_use]
    pub fn new(
        clock: Clock,
        auth: Arc<AuthState>,
        profiles: Arc<dyn ProfileRepository>,
        avatars: Arc<dyn AvatarStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            auth,
            profiles,
            avatars,
            notifier,
            clock,
            cached: RwLock::new(None),
        }
    }

    /// Read the profile row, creating it from session metadata the first time.
    ///
    /// # Errors
    ///
    /// Returns `ProfileServiceError::NotAuthenticated` when nobody is signed in
    /// and `ProfileServiceError::Storage` if the backend fails.
    pub async fn load_profile(&self) -> Result<Profile, ProfileServiceError> {
        let user = self.auth.require_user()?;
        let profile = match self.profiles.get_profile(user.id).await {
            Ok(profile) => profile,
            Err(StorageError::NotFound) => self.create_profile(&user).await?,
            Err(err) => {
                tracing::warn!(user = %user.id, error = %err, "profile load failed");
                return Err(err.into());
            }
        };
        self.remember(profile.clone());
        Ok(profile)
    }

    async fn create_profile(&self, user: &SessionUser) -> Result<Profile, StorageError> {
        tracing::info!(user = %user.id, "creating profile on first sign-in");
        match self
            .profiles
            .insert_profile(&user.new_profile(), self.clock.now())
            .await
        {
            Ok(profile) => Ok(profile),
            // Another tab created it first.
            Err(StorageError::Duplicate) => self.profiles.get_profile(user.id).await,
            Err(err) => Err(err),
        }
    }

    /// Cached profile for the current user, loading it if needed.
    ///
    /// # Errors
    ///
    /// Same as [`ProfileService::load_profile`].
    pub async fn ensure_profile(&self) -> Result<Profile, ProfileServiceError> {
        let user = self.auth.require_user()?;
        match self.profile() {
            Some(profile) if profile.id == user.id => Ok(profile),
            _ => self.load_profile().await,
        }
    }

    /// Apply a user edit. Only the name and avatar can change.
    ///
    /// # Errors
    ///
    /// Returns `ProfileServiceError::Validation` for an empty update,
    /// `ProfileServiceError::NotFound` if the profile row is missing and
    /// `ProfileServiceError::Storage` for other backend failures.
    pub async fn update_profile(
        &self,
        update: ProfileUpdate,
    ) -> Result<Profile, ProfileServiceError> {
        let user = self.auth.require_user()?;
        let update = update.validate()?;
        let profile = self
            .profiles
            .update_profile(user.id, &update, self.clock.now())
            .await
            .map_err(|err| match err {
                StorageError::NotFound => ProfileServiceError::NotFound,
                other => ProfileServiceError::Storage(other),
            })?;
        tracing::debug!(user = %user.id, "profile updated");
        self.remember(profile.clone());
        Ok(profile)
    }

    /// Store a new avatar image and point the profile at it.
    ///
    /// # Errors
    ///
    /// Returns `ProfileServiceError::Storage` if the upload or the profile
    /// update fails. Nothing is retried.
    pub async fn upload_avatar(&self, upload: AvatarUpload) -> Result<Profile, ProfileServiceError> {
        let user = self.auth.require_user()?;
        let path = format!(
            "{AVATAR_DIR}/{}-{}-{}.{}",
            user.id,
            self.clock.now_millis(),
            random_suffix(),
            upload.extension()
        );
        tracing::debug!(user = %user.id, path = %path, "uploading avatar");

        let url = match self
            .avatars
            .upload(&path, upload.content_type(), upload.bytes())
            .await
        {
            Ok(url) => url,
            Err(err) => {
                self.notifier.report_error(&err, "Failed to upload avatar");
                return Err(err.into());
            }
        };

        let profile = self
            .update_profile(ProfileUpdate::new().avatar_url(url))
            .await?;
        self.notifier.success("Avatar updated");
        Ok(profile)
    }

    /// Clear the avatar. A stored object that cannot be removed is left behind.
    ///
    /// # Errors
    ///
    /// Returns `ProfileServiceError::Storage` if the profile cannot be updated.
    pub async fn delete_avatar(&self) -> Result<Profile, ProfileServiceError> {
        let profile = self.ensure_profile().await?;
        let Some(url) = profile.avatar_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Ok(profile);
        };

        if let Some(path) = self.avatars.path_from_url(url) {
            if let Err(err) = self.avatars.remove(&path).await {
                tracing::warn!(path = %path, error = %err, "avatar object not removed");
            }
        }

        self.update_profile(ProfileUpdate::new().clear_avatar()).await
    }

    /// Last profile seen by this service.
    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn display_name(&self) -> String {
        self.profile()
            .map_or_else(|| "User".to_string(), |p| p.display_name().to_string())
    }

    #[must_use]
    pub fn initials(&self) -> String {
        self.profile()
            .map_or_else(|| "U".to_string(), |p| p.initials())
    }

    #[must_use]
    pub fn has_avatar(&self) -> bool {
        self.profile().is_some_and(|p| p.has_avatar())
    }

    /// Forget the cached profile, e.g. on sign-out.
    pub fn clear(&self) {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn remember(&self, profile: Profile) {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(profile);
    }
}

fn random_suffix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(AVATAR_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnhub_core::model::{ProfileError, UserId};
    use learnhub_core::time::fixed_now;
    use storage::InMemoryRepository;

    fn service(repo: &InMemoryRepository, auth: Arc<AuthState>) -> ProfileService {
        let clock = Clock::fixed(fixed_now());
        ProfileService::new(
            clock,
            auth,
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(Notifier::new(clock)),
        )
    }

    fn signed_in(user: SessionUser) -> Arc<AuthState> {
        let auth = Arc::new(AuthState::new());
        auth.sign_in(user);
        auth
    }

    #[tokio::test]
    async fn first_load_creates_profile_from_metadata() {
        let repo = InMemoryRepository::new();
        let user = SessionUser::new(UserId::random(), "ada@example.com").with_full_name("Ada Lovelace");
        let profiles = service(&repo, signed_in(user.clone()));

        let profile = profiles.load_profile().await.unwrap();
        assert_eq!(profile.id, user.id);
        assert_eq!(profile.full_name.as_deref(), Some("Ada Lovelace"));
        assert!(!profile.is_admin);
        assert_eq!(profiles.initials(), "AL");

        let again = profiles.ensure_profile().await.unwrap();
        assert_eq!(again, profile);
    }

    #[tokio::test]
    async fn signed_out_users_are_rejected() {
        let repo = InMemoryRepository::new();
        let profiles = service(&repo, Arc::new(AuthState::new()));
        assert!(matches!(
            profiles.load_profile().await,
            Err(ProfileServiceError::NotAuthenticated)
        ));
        assert_eq!(profiles.display_name(), "User");
    }

    #[tokio::test]
    async fn empty_updates_are_rejected() {
        let repo = InMemoryRepository::new();
        let profiles = service(&repo, signed_in(SessionUser::new(UserId::random(), "a@b.c")));
        profiles.load_profile().await.unwrap();
        assert!(matches!(
            profiles.update_profile(ProfileUpdate::new()).await,
            Err(ProfileServiceError::Validation(ProfileError::EmptyUpdate))
        ));
    }

    #[tokio::test]
    async fn avatar_upload_and_delete() {
        let repo = InMemoryRepository::new();
        let user = SessionUser::new(UserId::random(), "a@b.c");
        let profiles = service(&repo, signed_in(user.clone()));
        profiles.load_profile().await.unwrap();

        let upload = AvatarUpload::new("me.png", "image/png", vec![1, 2, 3]).unwrap();
        let profile = profiles.upload_avatar(upload).await.unwrap();
        let url = profile.avatar_url.clone().unwrap();
        assert!(url.contains(&format!("avatars/{}-", user.id)));
        assert!(url.ends_with(".png"));
        assert!(profiles.has_avatar());
        assert_eq!(repo.avatar_count().unwrap(), 1);

        let cleared = profiles.delete_avatar().await.unwrap();
        assert!(!cleared.has_avatar());
        assert_eq!(repo.avatar_count().unwrap(), 0);
    }

    #[test]
    fn suffix_is_nine_lowercase_alphanumerics() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), 9);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
        );
    }
}
