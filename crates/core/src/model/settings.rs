use thiserror::Error;
use url::Url;

use crate::model::quiz::{PassThreshold, QuizError};

/// Number of modules in the global curriculum.
pub const DEFAULT_TOTAL_MODULES: u32 = 12;

/// Validated backend connection and grading settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendSettings {
    api_url: Option<Url>,
    api_key: Option<String>,
    access_token: Option<String>,
    content_url: Option<Url>,
    total_modules: u32,
    global_pass: PassThreshold,
    course_pass: PassThreshold,
}

#[derive(Clone, Debug, Default)]
pub struct BackendSettingsDraft {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub content_url: Option<String>,
    pub total_modules: Option<u32>,
    pub global_pass_percent: Option<u32>,
    pub course_pass_percent: Option<u32>,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("invalid API URL: {0}")]
    InvalidApiUrl(String),
    #[error("invalid content URL: {0}")]
    InvalidContentUrl(String),
    #[error("an API URL requires an API key")]
    MissingApiKey,
    #[error("total module count must be positive")]
    ZeroModules,
    #[error(transparent)]
    Threshold(#[from] QuizError),
}

impl BackendSettingsDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and normalize the draft.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if a URL is present but invalid, a remote URL is
    /// given without a key, the module count is zero, or a threshold exceeds 100.
    pub fn validate(self) -> Result<BackendSettings, SettingsError> {
        let api_url = parse_url(self.api_url, SettingsError::InvalidApiUrl)?;
        let content_url = parse_url(self.content_url, SettingsError::InvalidContentUrl)?;
        let api_key = normalize_optional(self.api_key);
        let access_token = normalize_optional(self.access_token);

        if api_url.is_some() && api_key.is_none() {
            return Err(SettingsError::MissingApiKey);
        }

        let total_modules = self.total_modules.unwrap_or(DEFAULT_TOTAL_MODULES);
        if total_modules == 0 {
            return Err(SettingsError::ZeroModules);
        }

        let global_pass = self
            .global_pass_percent
            .map(PassThreshold::from_percent)
            .transpose()?
            .unwrap_or(PassThreshold::GLOBAL);
        let course_pass = self
            .course_pass_percent
            .map(PassThreshold::from_percent)
            .transpose()?
            .unwrap_or(PassThreshold::COURSE);

        Ok(BackendSettings {
            api_url,
            api_key,
            access_token,
            content_url,
            total_modules,
            global_pass,
            course_pass,
        })
    }
}

impl BackendSettings {
    #[must_use]
    pub fn api_url(&self) -> Option<&Url> {
        self.api_url.as_ref()
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    #[must_use]
    pub fn content_url(&self) -> Option<&Url> {
        self.content_url.as_ref()
    }

    #[must_use]
    pub fn total_modules(&self) -> u32 {
        self.total_modules
    }

    #[must_use]
    pub fn global_pass(&self) -> PassThreshold {
        self.global_pass
    }

    #[must_use]
    pub fn course_pass(&self) -> PassThreshold {
        self.course_pass
    }

    /// True when a remote progress backend is configured.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.api_url.is_some()
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            access_token: None,
            content_url: None,
            total_modules: DEFAULT_TOTAL_MODULES,
            global_pass: PassThreshold::GLOBAL,
            course_pass: PassThreshold::COURSE,
        }
    }
}

fn parse_url(
    value: Option<String>,
    err: fn(String) -> SettingsError,
) -> Result<Option<Url>, SettingsError> {
    match normalize_optional(value) {
        Some(raw) => Url::parse(&raw).map(Some).map_err(|_| err(raw)),
        None => Ok(None),
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_draft_uses_defaults() {
        let settings = BackendSettingsDraft::new().validate().unwrap();
        assert_eq!(settings, BackendSettings::default());
        assert!(!settings.is_remote());
    }

    #[test]
    fn blank_values_are_ignored() {
        let settings = BackendSettingsDraft {
            api_url: Some("   ".into()),
            api_key: Some(" ".into()),
            ..BackendSettingsDraft::default()
        }
        .validate()
        .unwrap();
        assert!(settings.api_url().is_none());
        assert!(settings.api_key().is_none());
    }

    #[test]
    fn remote_url_requires_key() {
        let err = BackendSettingsDraft {
            api_url: Some("https://db.example.com".into()),
            ..BackendSettingsDraft::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, SettingsError::MissingApiKey));
    }

    #[test]
    fn invalid_urls_and_thresholds_are_rejected() {
        let err = BackendSettingsDraft {
            content_url: Some("not a url".into()),
            ..BackendSettingsDraft::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidContentUrl(_)));

        let err = BackendSettingsDraft {
            global_pass_percent: Some(150),
            ..BackendSettingsDraft::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, SettingsError::Threshold(_)));
    }

    #[test]
    fn thresholds_can_be_overridden() {
        let settings = BackendSettingsDraft {
            api_url: Some("https://db.example.com".into()),
            api_key: Some("anon".into()),
            course_pass_percent: Some(80),
            total_modules: Some(20),
            ..BackendSettingsDraft::default()
        }
        .validate()
        .unwrap();
        assert_eq!(settings.course_pass().percent(), 80);
        assert_eq!(settings.global_pass(), PassThreshold::GLOBAL);
        assert_eq!(settings.total_modules(), 20);
        assert!(settings.is_remote());
    }
}
