use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{CategorySlug, CourseId, ModuleId};
use crate::model::quiz::{PassThreshold, QuizResult, rounded_percent};

//
// ─── MODULE STATUS ────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid module status: {0}")]
pub struct ModuleStatusError(pub String);

/// Lifecycle of a module for one user, as persisted remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    NotStarted,
    Started,
    InProgress,
    Completed,
}

impl ModuleStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleStatus::NotStarted => "not_started",
            ModuleStatus::Started => "started",
            ModuleStatus::InProgress => "in_progress",
            ModuleStatus::Completed => "completed",
        }
    }

    /// # Errors
    ///
    /// Returns `ModuleStatusError` for unknown status strings.
    pub fn parse(value: &str) -> Result<Self, ModuleStatusError> {
        match value {
            "not_started" => Ok(Self::NotStarted),
            "started" => Ok(Self::Started),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(ModuleStatusError(other.to_string())),
        }
    }

    #[must_use]
    pub fn is_completed(self) -> bool {
        matches!(self, ModuleStatus::Completed)
    }

    /// Status after a "start" request: only `not_started` is promoted.
    #[must_use]
    pub fn after_start(self) -> Self {
        match self {
            ModuleStatus::NotStarted => ModuleStatus::Started,
            other => other,
        }
    }

    /// Status after a section visit: anything short of completion becomes `in_progress`.
    #[must_use]
    pub fn after_section_visit(self) -> Self {
        match self {
            ModuleStatus::Completed => ModuleStatus::Completed,
            _ => ModuleStatus::InProgress,
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── SCOPE ────────────────────────────────────────────────────────────────────
//

/// Which table family a progress record lives in.
///
/// `Global` rows are keyed by module id alone; `Course` rows are additionally
/// keyed by category and course slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressScope {
    Global,
    Course {
        category: CategorySlug,
        course: CourseId,
    },
}

impl ProgressScope {
    #[must_use]
    pub fn course(category: CategorySlug, course: CourseId) -> Self {
        Self::Course { category, course }
    }

    /// Default pass threshold for quizzes recorded in this scope.
    #[must_use]
    pub fn default_threshold(&self) -> PassThreshold {
        match self {
            ProgressScope::Global => PassThreshold::GLOBAL,
            ProgressScope::Course { .. } => PassThreshold::COURSE,
        }
    }
}

//
// ─── OVERALL PROGRESS ─────────────────────────────────────────────────────────
//

/// Weighted roll-up: completed modules count fully, started-only modules count half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverallProgress {
    pub percentage: u32,
    pub completed: u32,
    pub started: u32,
    pub total: u32,
}

//
// ─── SNAPSHOT ─────────────────────────────────────────────────────────────────
//

/// In-memory projection of one user's progress.
///
/// Rebuilt wholesale on every load; mutated in place only after a remote write
/// has been acknowledged. Serialized verbatim for backup export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    #[serde(default)]
    started_module_ids: BTreeSet<ModuleId>,
    #[serde(default)]
    completed_module_ids: BTreeSet<ModuleId>,
    #[serde(default)]
    quiz_results: BTreeMap<ModuleId, QuizResult>,
    #[serde(default)]
    section_cursor: BTreeMap<ModuleId, u32>,
    #[serde(default)]
    last_accessed: Option<DateTime<Utc>>,
    #[serde(default)]
    current_module_id: Option<ModuleId>,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assemble a snapshot from already-reduced parts.
    #[must_use]
    pub fn from_parts(
        started_module_ids: BTreeSet<ModuleId>,
        completed_module_ids: BTreeSet<ModuleId>,
        quiz_results: BTreeMap<ModuleId, QuizResult>,
        section_cursor: BTreeMap<ModuleId, u32>,
        last_accessed: Option<DateTime<Utc>>,
        current_module_id: Option<ModuleId>,
    ) -> Self {
        Self {
            started_module_ids,
            completed_module_ids,
            quiz_results,
            section_cursor,
            last_accessed,
            current_module_id,
        }
    }

    #[must_use]
    pub fn started_module_ids(&self) -> &BTreeSet<ModuleId> {
        &self.started_module_ids
    }

    #[must_use]
    pub fn completed_module_ids(&self) -> &BTreeSet<ModuleId> {
        &self.completed_module_ids
    }

    #[must_use]
    pub fn quiz_results(&self) -> &BTreeMap<ModuleId, QuizResult> {
        &self.quiz_results
    }

    #[must_use]
    pub fn section_cursor(&self) -> &BTreeMap<ModuleId, u32> {
        &self.section_cursor
    }

    #[must_use]
    pub fn last_accessed(&self) -> Option<DateTime<Utc>> {
        self.last_accessed
    }

    #[must_use]
    pub fn current_module_id(&self) -> Option<&ModuleId> {
        self.current_module_id.as_ref()
    }

    #[must_use]
    pub fn is_started(&self, module: &ModuleId) -> bool {
        self.started_module_ids.contains(module)
    }

    #[must_use]
    pub fn is_completed(&self, module: &ModuleId) -> bool {
        self.completed_module_ids.contains(module)
    }

    /// Furthest section reached in a module; 0 when nothing is recorded.
    #[must_use]
    pub fn cursor(&self, module: &ModuleId) -> u32 {
        self.section_cursor.get(module).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn quiz_result(&self, module: &ModuleId) -> Option<&QuizResult> {
        self.quiz_results.get(module)
    }

    pub fn record_started(&mut self, module: &ModuleId, at: DateTime<Utc>) {
        self.started_module_ids.insert(module.clone());
        self.current_module_id = Some(module.clone());
        self.last_accessed = Some(at);
    }

    /// Completion implies the module was started.
    pub fn record_completed(&mut self, module: &ModuleId) {
        self.started_module_ids.insert(module.clone());
        self.completed_module_ids.insert(module.clone());
    }

    /// Advance the cursor to `max(current, section)` and return the new value.
    pub fn advance_cursor(&mut self, module: &ModuleId, section: u32) -> u32 {
        let cursor = self.section_cursor.entry(module.clone()).or_insert(0);
        *cursor = (*cursor).max(section);
        *cursor
    }

    pub fn record_quiz(&mut self, module: &ModuleId, result: QuizResult) {
        self.quiz_results.insert(module.clone(), result);
    }

    #[must_use]
    pub fn overall(&self, total_modules: u32) -> OverallProgress {
        let completed = u32::try_from(self.completed_module_ids.len()).unwrap_or(u32::MAX);
        let started = u32::try_from(self.started_module_ids.len()).unwrap_or(u32::MAX);
        // completed * 1.0 + (started - completed) * 0.5 == (started + completed) / 2
        let percentage = rounded_percent(
            u64::from(started) + u64::from(completed),
            u64::from(total_modules) * 2,
        );
        OverallProgress {
            percentage,
            completed,
            started,
            total: total_modules,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::quiz::QuizScore;
    use crate::time::fixed_now;

    fn m(id: &str) -> ModuleId {
        ModuleId::new(id)
    }

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            ModuleStatus::NotStarted,
            ModuleStatus::Started,
            ModuleStatus::InProgress,
            ModuleStatus::Completed,
        ] {
            assert_eq!(ModuleStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ModuleStatus::parse("done").is_err());
    }

    #[test]
    fn start_never_regresses_status() {
        assert_eq!(ModuleStatus::NotStarted.after_start(), ModuleStatus::Started);
        assert_eq!(ModuleStatus::InProgress.after_start(), ModuleStatus::InProgress);
        assert_eq!(ModuleStatus::Completed.after_start(), ModuleStatus::Completed);
        assert_eq!(
            ModuleStatus::Completed.after_section_visit(),
            ModuleStatus::Completed
        );
        assert_eq!(ModuleStatus::Started.after_section_visit(), ModuleStatus::InProgress);
    }

    #[test]
    fn cursor_only_moves_forward() {
        let mut snap = ProgressSnapshot::empty();
        assert_eq!(snap.advance_cursor(&m("a"), 4), 4);
        assert_eq!(snap.advance_cursor(&m("a"), 2), 4);
        assert_eq!(snap.advance_cursor(&m("a"), 6), 6);
        assert_eq!(snap.cursor(&m("a")), 6);
        assert_eq!(snap.cursor(&m("b")), 0);
    }

    #[test]
    fn started_updates_current_module() {
        let mut snap = ProgressSnapshot::empty();
        snap.record_started(&m("a"), fixed_now());
        assert!(snap.is_started(&m("a")));
        assert_eq!(snap.current_module_id(), Some(&m("a")));
        assert_eq!(snap.last_accessed(), Some(fixed_now()));
    }

    #[test]
    fn overall_progress_weights_started_half() {
        let mut snap = ProgressSnapshot::empty();
        snap.record_started(&m("a"), fixed_now());
        snap.record_started(&m("b"), fixed_now());
        snap.record_completed(&m("a"));
        // (1.0 + 0.5) / 12 = 12.5% -> 13
        let overall = snap.overall(12);
        assert_eq!(overall.completed, 1);
        assert_eq!(overall.started, 2);
        assert_eq!(overall.percentage, 13);
        assert_eq!(ProgressSnapshot::empty().overall(0).percentage, 0);
    }

    #[test]
    fn snapshot_serializes_with_camel_case_fields() {
        let mut snap = ProgressSnapshot::empty();
        snap.record_started(&m("a"), fixed_now());
        snap.record_quiz(
            &m("a"),
            QuizResult::graded(QuizScore::new(3, 5).unwrap(), PassThreshold::GLOBAL, fixed_now()),
        );
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("startedModuleIds").is_some());
        assert!(json.get("quizResults").is_some());
        let back: ProgressSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn scope_thresholds_differ() {
        assert_eq!(ProgressScope::Global.default_threshold(), PassThreshold::GLOBAL);
        let course = ProgressScope::course(CategorySlug::new("software-dev"), CourseId::new("x"));
        assert_eq!(course.default_threshold(), PassThreshold::COURSE);
    }
}
