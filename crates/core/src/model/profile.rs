use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::UserId;

/// Largest avatar accepted for upload.
pub const MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;

/// Image types accepted for avatars.
pub const ALLOWED_AVATAR_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProfileError {
    #[error("no valid fields to update")]
    EmptyUpdate,

    #[error("only JPEG, PNG, GIF, and WebP images are allowed (got {0})")]
    UnsupportedAvatarType(String),

    #[error("image must be less than 2MB (got {size} bytes)")]
    AvatarTooLarge { size: usize },
}

/// Persisted user profile row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Full name if set, otherwise the email, otherwise `"User"`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        non_blank(self.full_name.as_deref())
            .or_else(|| non_blank(Some(self.email.as_str())))
            .unwrap_or("User")
    }

    /// Up to two uppercase initials from the display name.
    #[must_use]
    pub fn initials(&self) -> String {
        self.display_name()
            .split(' ')
            .filter_map(|word| word.chars().next())
            .flat_map(char::to_uppercase)
            .take(2)
            .collect()
    }

    #[must_use]
    pub fn has_avatar(&self) -> bool {
        non_blank(self.avatar_url.as_deref()).is_some()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Profile row created on demand the first time a user signs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewProfile {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
}

impl NewProfile {
    /// Build from auth-provider metadata, preferring `full_name` over `name`.
    #[must_use]
    pub fn from_metadata(
        id: UserId,
        email: impl Into<String>,
        full_name: Option<&str>,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Self {
        let full_name = non_blank(full_name)
            .or_else(|| non_blank(name))
            .unwrap_or("User")
            .to_string();
        Self {
            id,
            email: email.into(),
            full_name,
            avatar_url: non_blank(avatar_url).map(str::to_string),
            is_admin: false,
        }
    }

    #[must_use]
    pub fn into_profile(self, created_at: DateTime<Utc>) -> Profile {
        Profile {
            id: self.id,
            email: self.email,
            full_name: Some(self.full_name),
            avatar_url: self.avatar_url,
            is_admin: self.is_admin,
            created_at,
            updated_at: None,
        }
    }
}

/// User-editable profile fields. Anything else is silently ignored upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    full_name: Option<String>,
    avatar_url: Option<Option<String>>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(Some(url.into()));
        self
    }

    #[must_use]
    pub fn clear_avatar(mut self) -> Self {
        self.avatar_url = Some(None);
        self
    }

    /// # Errors
    ///
    /// Returns `ProfileError::EmptyUpdate` when no field is set.
    pub fn validate(self) -> Result<Self, ProfileError> {
        if self.full_name.is_none() && self.avatar_url.is_none() {
            return Err(ProfileError::EmptyUpdate);
        }
        Ok(self)
    }

    #[must_use]
    pub fn new_full_name(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    /// `None` leaves the avatar alone, `Some(None)` clears it.
    #[must_use]
    pub fn new_avatar_url(&self) -> Option<Option<&str>> {
        self.avatar_url.as_ref().map(Option::as_deref)
    }

    /// Apply onto an existing profile.
    pub fn apply_to(&self, profile: &mut Profile, at: DateTime<Utc>) {
        if let Some(name) = &self.full_name {
            profile.full_name = Some(name.clone());
        }
        if let Some(url) = &self.avatar_url {
            profile.avatar_url.clone_from(url);
        }
        profile.updated_at = Some(at);
    }
}

/// A validated avatar image ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarUpload {
    file_name: String,
    content_type: String,
    bytes: Vec<u8>,
}

impl AvatarUpload {
    /// # Errors
    ///
    /// Returns `ProfileError::UnsupportedAvatarType` for non-image MIME types and
    /// `ProfileError::AvatarTooLarge` above [`MAX_AVATAR_BYTES`].
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, ProfileError> {
        let content_type = content_type.into();
        if !ALLOWED_AVATAR_TYPES.contains(&content_type.as_str()) {
            return Err(ProfileError::UnsupportedAvatarType(content_type));
        }
        if bytes.len() > MAX_AVATAR_BYTES {
            return Err(ProfileError::AvatarTooLarge { size: bytes.len() });
        }
        Ok(Self {
            file_name: file_name.into(),
            content_type,
            bytes,
        })
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Extension after the last dot of the original file name.
    #[must_use]
    pub fn extension(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map_or(self.file_name.as_str(), |(_, ext)| ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn profile(full_name: Option<&str>, email: &str) -> Profile {
        Profile {
            id: UserId::random(),
            email: email.to_string(),
            full_name: full_name.map(str::to_string),
            avatar_url: None,
            is_admin: false,
            created_at: fixed_now(),
            updated_at: None,
        }
    }

    #[test]
    fn display_name_falls_back_to_email_then_user() {
        assert_eq!(profile(Some("Ada Lovelace"), "a@x.io").display_name(), "Ada Lovelace");
        assert_eq!(profile(Some("  "), "a@x.io").display_name(), "a@x.io");
        assert_eq!(profile(None, "").display_name(), "User");
    }

    #[test]
    fn initials_take_first_two_words() {
        assert_eq!(profile(Some("ada byron lovelace"), "").initials(), "AB");
        assert_eq!(profile(None, "x@y.z").initials(), "X");
    }

    #[test]
    fn empty_update_is_rejected() {
        assert_eq!(ProfileUpdate::new().validate().unwrap_err(), ProfileError::EmptyUpdate);
        assert!(ProfileUpdate::new().clear_avatar().validate().is_ok());
    }

    #[test]
    fn update_applies_only_set_fields() {
        let mut p = profile(Some("Old"), "a@x.io");
        p.avatar_url = Some("https://cdn/a.png".into());
        ProfileUpdate::new().full_name("New").apply_to(&mut p, fixed_now());
        assert_eq!(p.full_name.as_deref(), Some("New"));
        assert!(p.has_avatar());
        ProfileUpdate::new().clear_avatar().apply_to(&mut p, fixed_now());
        assert!(!p.has_avatar());
    }

    #[test]
    fn avatar_validation() {
        assert!(matches!(
            AvatarUpload::new("a.pdf", "application/pdf", vec![1]),
            Err(ProfileError::UnsupportedAvatarType(_))
        ));
        assert!(matches!(
            AvatarUpload::new("a.png", "image/png", vec![0; MAX_AVATAR_BYTES + 1]),
            Err(ProfileError::AvatarTooLarge { .. })
        ));
        let ok = AvatarUpload::new("me.photo.webp", "image/webp", vec![0; 10]).unwrap();
        assert_eq!(ok.extension(), "webp");
    }

    #[test]
    fn new_profile_prefers_full_name_metadata() {
        let id = UserId::random();
        let p = NewProfile::from_metadata(id, "a@x.io", None, Some("Ada"), Some(""));
        assert_eq!(p.full_name, "Ada");
        assert!(p.avatar_url.is_none());
        assert!(!p.is_admin);
    }
}
