use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use storage::preferences::{PreferenceStore, THEME_KEY};
use storage::repository::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    /// Stored values other than `dark` read as light.
    #[must_use]
    pub fn from_stored(value: &str) -> Self {
        if value == "dark" { Theme::Dark } else { Theme::Light }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Light/dark preference. An explicit choice is persisted and wins over the
/// system setting.
pub struct ThemeService {
    prefs: Arc<dyn PreferenceStore>,
    current: RwLock<Theme>,
}

impl ThemeService {
    /// # Errors
    ///
    /// Returns `StorageError` if the preference store cannot be read.
    pub fn open(prefs: Arc<dyn PreferenceStore>, system_prefers_dark: bool) -> Result<Self, StorageError> {
        let current = match prefs.get(THEME_KEY)? {
            Some(stored) => Theme::from_stored(&stored),
            None if system_prefers_dark => Theme::Dark,
            None => Theme::Light,
        };
        Ok(Self {
            prefs,
            current: RwLock::new(current),
        })
    }

    #[must_use]
    pub fn theme(&self) -> Theme {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_dark(&self) -> bool {
        self.theme() == Theme::Dark
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the choice cannot be persisted.
    pub fn set(&self, theme: Theme) -> Result<(), StorageError> {
        self.prefs.set(THEME_KEY, theme.as_str())?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = theme;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the choice cannot be persisted.
    pub fn toggle(&self) -> Result<Theme, StorageError> {
        let next = self.theme().toggled();
        self.set(next)?;
        Ok(next)
    }

    /// Follow a system change unless the user picked a theme explicitly.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the preference store cannot be read.
    pub fn system_preference_changed(&self, prefers_dark: bool) -> Result<(), StorageError> {
        if self.prefs.get(THEME_KEY)?.is_none() {
            let theme = if prefers_dark { Theme::Dark } else { Theme::Light };
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = theme;
        }
        Ok(())
    }
}
