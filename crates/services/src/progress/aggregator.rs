use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use learnhub_core::model::{
    AttemptId, BackendSettings, ModuleId, ModuleStatus, OverallProgress, PassThreshold, ProgressScope,
    ProgressSnapshot, QuizAnswer, QuizResult, QuizScore, UserId,
};
use storage::repository::{
    ModuleRecord, NewQuizAttempt, QuizAnswerRecord, SectionRecord, StorageError,
};

use super::inflight::InFlight;
use super::reduce::reduce_snapshot;
use super::{ProgressRepos, QuizAttemptSaved, WriteOutcome};
use crate::Clock;
use crate::error::ProgressError;
use crate::notifications::Notifier;

/// Grading and clock settings for one aggregator.
#[derive(Debug, Clone, Copy)]
pub struct ProgressConfig {
    pub clock: Clock,
    pub pass_threshold: PassThreshold,
}

impl ProgressConfig {
    /// Threshold configured for the scope's table family.
    #[must_use]
    pub fn for_scope(scope: &ProgressScope, settings: &BackendSettings, clock: Clock) -> Self {
        let pass_threshold = match scope {
            ProgressScope::Global => settings.global_pass(),
            ProgressScope::Course { .. } => settings.course_pass(),
        };
        Self {
            clock,
            pass_threshold,
        }
    }

    /// Built-in threshold for the scope.
    #[must_use]
    pub fn with_defaults(scope: &ProgressScope, clock: Clock) -> Self {
        Self {
            clock,
            pass_threshold: scope.default_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded { at: DateTime<Utc> },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WriteKey {
    Start(ModuleId),
    Complete(ModuleId),
    Section(ModuleId, u32),
}

/// Owns one signed-in user's progress for one scope.
///
/// Reads go through [`ProgressAggregator::load_progress`], which replaces the
/// snapshot wholesale. Writes are pessimistic: the snapshot only changes after
/// the backend acknowledges the write. Identical writes issued while one is
/// pending share its round trip.
pub struct ProgressAggregator {
    user: UserId,
    scope: ProgressScope,
    repos: ProgressRepos,
    notifier: Arc<Notifier>,
    config: ProgressConfig,
    snapshot: RwLock<ProgressSnapshot>,
    load_state: RwLock<LoadState>,
    loads: InFlight<(), Result<ProgressSnapshot, ProgressError>>,
    writes: InFlight<WriteKey, WriteOutcome<()>>,
    /// Serializes read-modify-write of one module row.
    module_rows: Mutex<HashMap<ModuleId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProgressAggregator {
    #[must_use]
    pub fn new(
        user: UserId,
        scope: ProgressScope,
        repos: ProgressRepos,
        notifier: Arc<Notifier>,
        config: ProgressConfig,
    ) -> Self {
        Self {
            user,
            scope,
            repos,
            notifier,
            config,
            snapshot: RwLock::new(ProgressSnapshot::empty()),
            load_state: RwLock::new(LoadState::NotLoaded),
            loads: InFlight::new(),
            writes: InFlight::new(),
            module_rows: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn user(&self) -> UserId {
        self.user
    }

    #[must_use]
    pub fn scope(&self) -> &ProgressScope {
        &self.scope
    }

    #[must_use]
    pub fn pass_threshold(&self) -> PassThreshold {
        self.config.pass_threshold
    }

    //
    // ─── LOAD ──────────────────────────────────────────────────────────────────
    //

    /// Fetch all progress rows and rebuild the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if any of the three reads fails; the
    /// previous snapshot is kept in that case.
    pub async fn load_progress(&self) -> Result<ProgressSnapshot, ProgressError> {
        self.loads.run((), || self.fetch_and_replace()).await
    }

    async fn fetch_and_replace(&self) -> Result<ProgressSnapshot, ProgressError> {
        self.set_load_state(LoadState::Loading);
        let rows = tokio::try_join!(
            self.repos.modules.list_modules(self.user, &self.scope),
            self.repos.sections.list_sections(self.user, &self.scope),
            self.repos.quiz_attempts.list_attempts(self.user, &self.scope),
        );

        match rows {
            Ok((modules, sections, attempts)) => {
                let snapshot = reduce_snapshot(&modules, &sections, &attempts);
                tracing::debug!(
                    user = %self.user,
                    modules = modules.len(),
                    sections = sections.len(),
                    attempts = attempts.len(),
                    "progress loaded"
                );
                *self.write_snapshot() = snapshot.clone();
                self.set_load_state(LoadState::Loaded {
                    at: self.config.clock.now(),
                });
                Ok(snapshot)
            }
            Err(err) => {
                tracing::warn!(user = %self.user, error = %err, "progress load failed");
                self.set_load_state(LoadState::Failed {
                    message: err.user_message(),
                });
                Err(err.into())
            }
        }
    }

    //
    // ─── WRITES ────────────────────────────────────────────────────────────────
    //

    /// Record that the learner opened a module. Never moves a module backwards.
    pub async fn mark_module_started(&self, module: &ModuleId) -> WriteOutcome<()> {
        self.writes
            .run(WriteKey::Start(module.clone()), || async {
                let now = self.config.clock.now();
                match self.write_started(module, now).await {
                    Ok(()) => {
                        self.write_snapshot().record_started(module, now);
                        WriteOutcome::Committed(())
                    }
                    Err(err) => self.fail(err, "Failed to start module"),
                }
            })
            .await
    }

    async fn write_started(&self, module: &ModuleId, now: DateTime<Utc>) -> Result<(), StorageError> {
        let row = self.module_row(module);
        let _row = row.lock().await;
        let record = match self.existing_module(module).await? {
            Some(mut record) => {
                record.status = record.status.after_start();
                record.started_at.get_or_insert(now);
                record.updated_at = now;
                record
            }
            None => ModuleRecord::started(self.user, self.scope.clone(), module.clone(), now),
        };
        self.repos.modules.upsert_module(&record).await
    }

    /// Mark a module completed. Repeat calls keep the first completion time.
    pub async fn mark_module_completed(&self, module: &ModuleId) -> WriteOutcome<()> {
        self.writes
            .run(WriteKey::Complete(module.clone()), || async {
                let now = self.config.clock.now();
                match self.write_completed(module, now).await {
                    Ok(()) => {
                        self.write_snapshot().record_completed(module);
                        WriteOutcome::Committed(())
                    }
                    Err(err) => self.fail(err, "Failed to complete module"),
                }
            })
            .await
    }

    async fn write_completed(
        &self,
        module: &ModuleId,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let row = self.module_row(module);
        let _row = row.lock().await;
        let mut record = self
            .existing_module(module)
            .await?
            .unwrap_or_else(|| {
                ModuleRecord::started(self.user, self.scope.clone(), module.clone(), now)
            });
        record.status = ModuleStatus::Completed;
        record.started_at.get_or_insert(now);
        record.completed_at.get_or_insert(now);
        record.updated_at = now;
        self.repos.modules.upsert_module(&record).await
    }

    /// Record a visit to `section` and advance the module's cursor.
    pub async fn update_module_progress(&self, module: &ModuleId, section: u32) -> WriteOutcome<()> {
        self.writes
            .run(WriteKey::Section(module.clone(), section), || async {
                let now = self.config.clock.now();
                match self.write_section(module, section, now).await {
                    Ok(()) => {
                        let mut snapshot = self.write_snapshot();
                        snapshot.record_started(module, now);
                        snapshot.advance_cursor(module, section);
                        WriteOutcome::Committed(())
                    }
                    Err(err) => self.fail(err, "Failed to save section progress"),
                }
            })
            .await
    }

    async fn write_section(
        &self,
        module: &ModuleId,
        section: u32,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.repos
            .sections
            .upsert_section(&SectionRecord {
                user_id: self.user,
                scope: self.scope.clone(),
                module_id: module.clone(),
                section_index: section,
                completed_at: now,
            })
            .await?;

        let row = self.module_row(module);
        let _row = row.lock().await;
        let mut record = self
            .existing_module(module)
            .await?
            .unwrap_or_else(|| {
                ModuleRecord::started(self.user, self.scope.clone(), module.clone(), now)
            });
        record.status = record.status.after_section_visit();
        record.started_at.get_or_insert(now);
        record.current_section = record.current_section.max(section);
        record.updated_at = now;
        self.repos.modules.upsert_module(&record).await
    }

    /// Grade and store a quiz attempt. A passing attempt also completes the
    /// module. Attempts are append-only, so concurrent saves are never merged.
    pub async fn save_quiz_score(
        &self,
        module: &ModuleId,
        score: u32,
        total: u32,
        answers: &[QuizAnswer],
        time_taken_secs: Option<u32>,
    ) -> WriteOutcome<QuizAttemptSaved> {
        let graded = match QuizScore::new(score, total) {
            Ok(graded) => graded,
            Err(err) => return self.fail(err, "Failed to save quiz score"),
        };
        let now = self.config.clock.now();
        let result = QuizResult::graded(graded, self.config.pass_threshold, now);

        let latest = match self
            .repos
            .quiz_attempts
            .latest_attempt_number(self.user, &self.scope, module)
            .await
        {
            Ok(latest) => latest,
            Err(err) => return self.fail(err, "Failed to save quiz score"),
        };
        let attempt_number = latest.map_or(1, |n| n + 1);

        let attempt = match self
            .repos
            .quiz_attempts
            .insert_attempt(&NewQuizAttempt {
                user_id: self.user,
                scope: self.scope.clone(),
                module_id: module.clone(),
                attempt_number,
                score,
                total_questions: total,
                passed: result.passed,
                time_taken_secs,
                completed_at: now,
            })
            .await
        {
            Ok(attempt) => attempt,
            Err(err) => return self.fail(err, "Failed to save quiz score"),
        };

        let answers_saved = self.save_answers(attempt.id, answers).await;
        self.write_snapshot().record_quiz(module, result.clone());
        tracing::info!(
            user = %self.user,
            module = %module,
            attempt_number,
            passed = result.passed,
            "quiz attempt saved"
        );

        let module_completed = result.passed && self.mark_module_completed(module).await.is_committed();

        WriteOutcome::Committed(QuizAttemptSaved {
            attempt_id: attempt.id,
            attempt_number,
            result,
            answers_saved,
            module_completed,
        })
    }

    async fn save_answers(
        &self,
        attempt_id: AttemptId,
        answers: &[QuizAnswer],
    ) -> bool {
        if answers.is_empty() {
            return true;
        }
        let rows: Vec<QuizAnswerRecord> = answers
            .iter()
            .zip(0_u32..)
            .map(|(answer, question_index)| QuizAnswerRecord {
                attempt_id,
                question_index,
                selected_answer: answer.selected,
                is_correct: answer.correct,
            })
            .collect();
        match self.repos.quiz_attempts.insert_answers(&rows).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(attempt = %attempt_id, error = %err, "quiz answers not stored");
                self.notifier
                    .report_error(&err, "Quiz score saved, but answers could not be stored");
                false
            }
        }
    }

    //
    // ─── READS ─────────────────────────────────────────────────────────────────
    //

    /// Clone of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.read_snapshot().clone()
    }

    #[must_use]
    pub fn module_cursor(&self, module: &ModuleId) -> u32 {
        self.read_snapshot().cursor(module)
    }

    #[must_use]
    pub fn is_module_started(&self, module: &ModuleId) -> bool {
        self.read_snapshot().is_started(module)
    }

    #[must_use]
    pub fn is_module_completed(&self, module: &ModuleId) -> bool {
        self.read_snapshot().is_completed(module)
    }

    #[must_use]
    pub fn quiz_result(&self, module: &ModuleId) -> Option<QuizResult> {
        self.read_snapshot().quiz_result(module).cloned()
    }

    #[must_use]
    pub fn overall_progress(&self, total_modules: u32) -> OverallProgress {
        self.read_snapshot().overall(total_modules)
    }

    #[must_use]
    pub fn total_started(&self) -> usize {
        self.read_snapshot().started_module_ids().len()
    }

    #[must_use]
    pub fn total_completed(&self) -> usize {
        self.read_snapshot().completed_module_ids().len()
    }

    #[must_use]
    pub fn load_state(&self) -> LoadState {
        self.load_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    //
    // ─── BACKUP ────────────────────────────────────────────────────────────────
    //

    /// Pretty-printed JSON of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Serialization` if encoding fails.
    pub fn export_progress(&self) -> Result<String, ProgressError> {
        Ok(serde_json::to_string_pretty(&*self.read_snapshot())?)
    }

    /// Replace the in-memory snapshot with a previously exported one. The
    /// backend is not touched.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Serialization` for malformed input; the current
    /// snapshot is kept.
    pub fn import_progress(&self, json: &str) -> Result<(), ProgressError> {
        let snapshot: ProgressSnapshot = serde_json::from_str(json)?;
        *self.write_snapshot() = snapshot;
        Ok(())
    }

    /// Drop all in-memory progress, e.g. on sign-out.
    pub fn reset(&self) {
        *self.write_snapshot() = ProgressSnapshot::empty();
        self.set_load_state(LoadState::NotLoaded);
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────────
    //

    async fn existing_module(&self, module: &ModuleId) -> Result<Option<ModuleRecord>, StorageError> {
        match self
            .repos
            .modules
            .get_module(self.user, &self.scope, module)
            .await
        {
            Ok(record) => Ok(Some(record)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn module_row(&self, module: &ModuleId) -> Arc<tokio::sync::Mutex<()>> {
        let mut rows = self.module_rows.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(rows.entry(module.clone()).or_default())
    }

    fn fail<T>(&self, err: impl Into<ProgressError>, context: &str) -> WriteOutcome<T> {
        let err = err.into();
        tracing::warn!(user = %self.user, context, error = %err, "progress write failed");
        self.notifier.report_error(&err, context);
        WriteOutcome::Failed(err)
    }

    fn read_snapshot(&self) -> RwLockReadGuard<'_, ProgressSnapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_snapshot(&self) -> RwLockWriteGuard<'_, ProgressSnapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_load_state(&self, state: LoadState) {
        *self.load_state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}
