use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use learnhub_core::model::{
    ModuleId, OverallProgress, PassThreshold, ProgressSnapshot, QuizResult, QuizScore,
};
use storage::preferences::{PROGRESS_KEY, PreferenceStore, get_json, set_json};

use crate::Clock;
use crate::error::ProgressError;

/// Guest progress kept on the device.
///
/// Same snapshot shape as the signed-in aggregator, persisted to the
/// preference store after every change.
pub struct LocalProgressTracker {
    prefs: Arc<dyn PreferenceStore>,
    clock: Clock,
    threshold: PassThreshold,
    snapshot: RwLock<ProgressSnapshot>,
}

impl LocalProgressTracker {
    /// Load any saved progress; unreadable data starts empty.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the preference store fails.
    pub fn open(prefs: Arc<dyn PreferenceStore>, clock: Clock) -> Result<Self, ProgressError> {
        let snapshot = get_json(prefs.as_ref(), PROGRESS_KEY)?.unwrap_or_default();
        Ok(Self {
            prefs,
            clock,
            threshold: PassThreshold::GLOBAL,
            snapshot: RwLock::new(snapshot),
        })
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: PassThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProgressSnapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, snapshot: &ProgressSnapshot) -> Result<(), ProgressError> {
        set_json(self.prefs.as_ref(), PROGRESS_KEY, snapshot)?;
        Ok(())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut ProgressSnapshot) -> T) -> Result<T, ProgressError> {
        let mut snapshot = self.write();
        let mut next = snapshot.clone();
        let out = f(&mut next);
        self.persist(&next)?;
        *snapshot = next;
        Ok(out)
    }

    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the change cannot be persisted.
    pub fn mark_started(&self, module: &ModuleId) -> Result<(), ProgressError> {
        let now = self.clock.now();
        self.mutate(|s| s.record_started(module, now))
    }

    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the change cannot be persisted.
    pub fn mark_completed(&self, module: &ModuleId) -> Result<(), ProgressError> {
        self.mutate(|s| s.record_completed(module))
    }

    /// Advance the section cursor and return its new value.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the change cannot be persisted.
    pub fn update_section(&self, module: &ModuleId, section: u32) -> Result<u32, ProgressError> {
        self.mutate(|s| s.advance_cursor(module, section))
    }

    /// Grade a quiz; a passing score also completes the module.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Validation` for an impossible score and
    /// `ProgressError::Storage` if the change cannot be persisted.
    pub fn save_quiz_score(
        &self,
        module: &ModuleId,
        score: u32,
        total: u32,
    ) -> Result<QuizResult, ProgressError> {
        let graded = QuizScore::new(score, total)?;
        let result = QuizResult::graded(graded, self.threshold, self.clock.now());
        self.mutate(|s| {
            s.record_quiz(module, result.clone());
            if result.passed {
                s.record_completed(module);
            }
        })?;
        Ok(result)
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn overall_progress(&self, total_modules: u32) -> OverallProgress {
        self.snapshot().overall(total_modules)
    }

    /// # Errors
    ///
    /// Returns `ProgressError::Serialization` if encoding fails.
    pub fn export(&self) -> Result<String, ProgressError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    /// Overlay an exported document onto the current progress. Fields present
    /// in `json` replace the current ones; absent fields are kept.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Serialization` for malformed input, leaving the
    /// current progress untouched.
    pub fn import(&self, json: &str) -> Result<(), ProgressError> {
        let incoming: serde_json::Value = serde_json::from_str(json)?;
        let serde_json::Value::Object(incoming) = incoming else {
            return Err(ProgressError::Serialization(
                "progress backup must be a JSON object".into(),
            ));
        };

        let mut snapshot = self.write();
        let mut merged = serde_json::to_value(&*snapshot)?;
        if let serde_json::Value::Object(current) = &mut merged {
            current.extend(incoming);
        }
        let next: ProgressSnapshot = serde_json::from_value(merged)?;
        self.persist(&next)?;
        *snapshot = next;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the change cannot be persisted.
    pub fn reset(&self) -> Result<(), ProgressError> {
        self.mutate(|s| *s = ProgressSnapshot::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnhub_core::time::fixed_now;
    use storage::StorageError;
    use storage::preferences::InMemoryPreferences;

    /// Reads succeed; every write is refused.
    struct ReadOnlyPrefs(InMemoryPreferences);

    impl PreferenceStore for ReadOnlyPrefs {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get(key)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Connection("disk full".into()))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Connection("disk full".into()))
        }
    }

    fn m(id: &str) -> ModuleId {
        ModuleId::new(id)
    }

    fn tracker(prefs: &InMemoryPreferences) -> LocalProgressTracker {
        LocalProgressTracker::open(Arc::new(prefs.clone()), Clock::fixed(fixed_now())).unwrap()
    }

    #[test]
    fn progress_survives_reopen() {
        let prefs = InMemoryPreferences::new();
        let local = tracker(&prefs);
        local.mark_started(&m("1")).unwrap();
        assert_eq!(local.update_section(&m("1"), 3).unwrap(), 3);
        assert_eq!(local.update_section(&m("1"), 1).unwrap(), 3);

        let reopened = tracker(&prefs);
        let snap = reopened.snapshot();
        assert!(snap.is_started(&m("1")));
        assert_eq!(snap.cursor(&m("1")), 3);
        assert_eq!(snap.current_module_id(), Some(&m("1")));
    }

    #[test]
    fn quiz_threshold_decides_completion() {
        let prefs = InMemoryPreferences::new();
        let local = tracker(&prefs);
        assert!(local.save_quiz_score(&m("1"), 3, 5).unwrap().passed);
        assert!(!local.save_quiz_score(&m("2"), 2, 5).unwrap().passed);
        assert!(local.snapshot().is_completed(&m("1")));
        assert!(!local.snapshot().is_completed(&m("2")));
        assert!(matches!(
            local.save_quiz_score(&m("3"), 1, 0),
            Err(ProgressError::Validation(_))
        ));

        let strict = tracker(&prefs).with_threshold(PassThreshold::COURSE);
        assert!(!strict.save_quiz_score(&m("4"), 3, 5).unwrap().passed);
    }

    #[test]
    fn import_merges_fields_and_rejects_garbage() {
        let prefs = InMemoryPreferences::new();
        let local = tracker(&prefs);
        local.mark_started(&m("keep")).unwrap();

        local
            .import(r#"{"completedModuleIds": ["x"]}"#)
            .unwrap();
        let snap = local.snapshot();
        assert!(snap.is_started(&m("keep")));
        assert!(snap.is_completed(&m("x")));

        assert!(local.import("not json").is_err());
        assert!(local.import("[1, 2]").is_err());
        assert_eq!(local.snapshot(), snap);

        let exported = local.export().unwrap();
        local.reset().unwrap();
        assert_eq!(local.overall_progress(12).percentage, 0);
        local.import(&exported).unwrap();
        assert_eq!(local.snapshot(), snap);
    }

    #[test]
    fn failed_persist_leaves_memory_untouched() {
        let prefs = InMemoryPreferences::new();
        tracker(&prefs).mark_started(&m("1")).unwrap();

        let local = LocalProgressTracker::open(
            Arc::new(ReadOnlyPrefs(prefs.clone())),
            Clock::fixed(fixed_now()),
        )
        .unwrap();
        let before = local.snapshot();

        assert!(local.mark_completed(&m("1")).is_err());
        assert!(local.update_section(&m("1"), 4).is_err());
        assert!(local.import(r#"{"completedModuleIds": ["2"]}"#).is_err());
        assert_eq!(local.snapshot(), before);
        assert!(!local.snapshot().is_completed(&m("1")));
    }
}
