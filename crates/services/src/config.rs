use std::env;
use std::path::PathBuf;

use learnhub_core::model::{BackendSettings, BackendSettingsDraft, SettingsError};

/// Process configuration read from `LEARNHUB_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct LearnHubConfig {
    pub backend: BackendSettings,
    pub prefs_path: Option<PathBuf>,
}

impl LearnHubConfig {
    /// # Errors
    ///
    /// Returns `SettingsError` when a variable is present but invalid.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` when a value is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str| var(key).and_then(|v| v.trim().parse::<u32>().ok());

        let draft = BackendSettingsDraft {
            api_url: var("LEARNHUB_API_URL"),
            api_key: var("LEARNHUB_API_KEY"),
            access_token: var("LEARNHUB_ACCESS_TOKEN"),
            content_url: var("LEARNHUB_CONTENT_URL"),
            total_modules: number("LEARNHUB_TOTAL_MODULES"),
            global_pass_percent: number("LEARNHUB_GLOBAL_PASS_PERCENT"),
            course_pass_percent: number("LEARNHUB_COURSE_PASS_PERCENT"),
        };

        Ok(Self {
            backend: draft.validate()?,
            prefs_path: var("LEARNHUB_PREFS_PATH").map(PathBuf::from),
        })
    }
}
