use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use learnhub_core::model::{
    AttemptId, CategorySlug, CourseId, ModuleId, ModuleStatus, ProgressScope, QuizAnswer, UserId,
};
use learnhub_core::time::fixed_now;
use services::Clock;
use services::notifications::Notifier;
use services::progress::{LoadState, ProgressAggregator, ProgressConfig, ProgressRepos};
use storage::memory::InMemoryRepository;
use storage::repository::{
    ModuleProgressRepository, ModuleRecord, NewQuizAttempt, QuizAnswerRecord,
    QuizAttemptRecord, QuizAttemptRepository, SectionProgressRepository, SectionRecord,
    StorageError,
};

fn repos(repo: &InMemoryRepository) -> ProgressRepos {
    ProgressRepos {
        modules: Arc::new(repo.clone()),
        sections: Arc::new(repo.clone()),
        quiz_attempts: Arc::new(repo.clone()),
    }
}

fn aggregator(
    user: UserId,
    scope: ProgressScope,
    repos: ProgressRepos,
    clock: Clock,
) -> (ProgressAggregator, Arc<Notifier>) {
    let notifier = Arc::new(Notifier::new(clock));
    let config = ProgressConfig::with_defaults(&scope, clock);
    (
        ProgressAggregator::new(user, scope, repos, Arc::clone(&notifier), config),
        notifier,
    )
}

fn module(id: &str) -> ModuleId {
    ModuleId::new(id)
}

fn course_scope() -> ProgressScope {
    ProgressScope::course(
        CategorySlug::new("software-dev"),
        CourseId::new("claude-code-training"),
    )
}

// ─── Fakes ─────────────────────────────────────────────────────────────────────

/// Counts module upserts and holds each one open briefly.
struct CountingModules {
    inner: InMemoryRepository,
    upserts: AtomicUsize,
}

#[async_trait]
impl ModuleProgressRepository for CountingModules {
    async fn list_modules(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<ModuleRecord>, StorageError> {
        self.inner.list_modules(user, scope).await
    }

    async fn get_module(
        &self,
        user: UserId,
        scope: &ProgressScope,
        module: &ModuleId,
    ) -> Result<ModuleRecord, StorageError> {
        self.inner.get_module(user, scope, module).await
    }

    async fn upsert_module(&self, record: &ModuleRecord) -> Result<(), StorageError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inner.upsert_module(record).await
    }
}

/// Holds in-progress upserts much longer than completions.
struct SlowVisits {
    inner: InMemoryRepository,
}

#[async_trait]
impl ModuleProgressRepository for SlowVisits {
    async fn list_modules(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<ModuleRecord>, StorageError> {
        self.inner.list_modules(user, scope).await
    }

    async fn get_module(
        &self,
        user: UserId,
        scope: &ProgressScope,
        module: &ModuleId,
    ) -> Result<ModuleRecord, StorageError> {
        self.inner.get_module(user, scope, module).await
    }

    async fn upsert_module(&self, record: &ModuleRecord) -> Result<(), StorageError> {
        let delay = if record.status == ModuleStatus::Completed { 5 } else { 40 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.inner.upsert_module(record).await
    }
}

/// Section reads fail while `down` is set.
struct FlakySections {
    inner: InMemoryRepository,
    down: AtomicBool,
}

#[async_trait]
impl SectionProgressRepository for FlakySections {
    async fn list_sections(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<SectionRecord>, StorageError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("connection reset".into()));
        }
        self.inner.list_sections(user, scope).await
    }

    async fn upsert_section(&self, record: &SectionRecord) -> Result<(), StorageError> {
        self.inner.upsert_section(record).await
    }
}

/// Stores attempts but rejects every answer batch.
struct AnswerlessAttempts {
    inner: InMemoryRepository,
}

#[async_trait]
impl QuizAttemptRepository for AnswerlessAttempts {
    async fn list_attempts(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<QuizAttemptRecord>, StorageError> {
        self.inner.list_attempts(user, scope).await
    }

    async fn latest_attempt_number(
        &self,
        user: UserId,
        scope: &ProgressScope,
        module: &ModuleId,
    ) -> Result<Option<u32>, StorageError> {
        self.inner.latest_attempt_number(user, scope, module).await
    }

    async fn insert_attempt(
        &self,
        attempt: &NewQuizAttempt,
    ) -> Result<QuizAttemptRecord, StorageError> {
        self.inner.insert_attempt(attempt).await
    }

    async fn insert_answers(&self, _answers: &[QuizAnswerRecord]) -> Result<(), StorageError> {
        Err(StorageError::Connection("timeout".into()))
    }

    async fn list_answers(
        &self,
        attempt: AttemptId,
    ) -> Result<Vec<QuizAnswerRecord>, StorageError> {
        self.inner.list_answers(attempt).await
    }
}

// ─── Modules ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn completion_is_idempotent_and_keeps_first_timestamp() {
    let repo = InMemoryRepository::new();
    let user = UserId::random();
    let first_at = fixed_now();

    let (first, _) = aggregator(user, ProgressScope::Global, repos(&repo), Clock::fixed(first_at));
    assert!(first.mark_module_completed(&module("1")).await.is_committed());

    let later = Clock::fixed(first_at + ChronoDuration::hours(1));
    let (second, _) = aggregator(user, ProgressScope::Global, repos(&repo), later);
    assert!(second.mark_module_completed(&module("1")).await.is_committed());

    let record = repo
        .get_module(user, &ProgressScope::Global, &module("1"))
        .await
        .unwrap();
    assert_eq!(record.status, ModuleStatus::Completed);
    assert_eq!(record.completed_at, Some(first_at));
    assert_eq!(record.started_at, Some(first_at));

    second.load_progress().await.unwrap();
    assert_eq!(second.total_completed(), 1);
    assert!(second.is_module_completed(&module("1")));
}

#[tokio::test]
async fn starting_a_completed_module_does_not_regress_it() {
    let repo = InMemoryRepository::new();
    let user = UserId::random();
    let (progress, _) = aggregator(user, ProgressScope::Global, repos(&repo), Clock::fixed(fixed_now()));

    assert!(progress.mark_module_completed(&module("2")).await.is_committed());
    assert!(progress.mark_module_started(&module("2")).await.is_committed());

    let record = repo
        .get_module(user, &ProgressScope::Global, &module("2"))
        .await
        .unwrap();
    assert_eq!(record.status, ModuleStatus::Completed);
    assert!(progress.is_module_completed(&module("2")));
}

#[tokio::test]
async fn section_cursor_never_moves_backwards() {
    let repo = InMemoryRepository::new();
    let user = UserId::random();
    let (progress, _) = aggregator(user, ProgressScope::Global, repos(&repo), Clock::fixed(fixed_now()));

    assert!(progress.update_module_progress(&module("1"), 3).await.is_committed());
    assert!(progress.update_module_progress(&module("1"), 1).await.is_committed());
    assert_eq!(progress.module_cursor(&module("1")), 3);
    assert!(progress.is_module_started(&module("1")));

    let record = repo
        .get_module(user, &ProgressScope::Global, &module("1"))
        .await
        .unwrap();
    assert_eq!(record.current_section, 3);
    assert_eq!(record.status, ModuleStatus::InProgress);

    progress.reset();
    progress.load_progress().await.unwrap();
    assert_eq!(progress.module_cursor(&module("1")), 3);
}

#[tokio::test]
async fn concurrent_identical_writes_share_one_round_trip() {
    let repo = InMemoryRepository::new();
    let counting = Arc::new(CountingModules {
        inner: repo.clone(),
        upserts: AtomicUsize::new(0),
    });
    let progress_repos = ProgressRepos {
        modules: counting.clone(),
        sections: Arc::new(repo.clone()),
        quiz_attempts: Arc::new(repo.clone()),
    };
    let (progress, _) = aggregator(
        UserId::random(),
        ProgressScope::Global,
        progress_repos,
        Clock::fixed(fixed_now()),
    );

    let intro = module("1");
    let (a, b) = tokio::join!(
        progress.mark_module_started(&intro),
        progress.mark_module_started(&intro),
    );
    assert!(a.is_committed());
    assert!(b.is_committed());
    assert_eq!(counting.upserts.load(Ordering::SeqCst), 1);

    assert!(progress.mark_module_started(&module("1")).await.is_committed());
    assert_eq!(counting.upserts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn section_visit_overlapping_completion_keeps_it_completed() {
    let repo = InMemoryRepository::new();
    let user = UserId::random();
    let progress_repos = ProgressRepos {
        modules: Arc::new(SlowVisits { inner: repo.clone() }),
        sections: Arc::new(repo.clone()),
        quiz_attempts: Arc::new(repo.clone()),
    };
    let (progress, _) = aggregator(
        user,
        ProgressScope::Global,
        progress_repos,
        Clock::fixed(fixed_now()),
    );

    let intro = module("1");
    let (visit, complete) = tokio::join!(
        progress.update_module_progress(&intro, 3),
        progress.mark_module_completed(&intro),
    );
    assert!(visit.is_committed());
    assert!(complete.is_committed());

    let record = repo
        .get_module(user, &ProgressScope::Global, &intro)
        .await
        .unwrap();
    assert_eq!(record.status, ModuleStatus::Completed);
    assert_eq!(record.completed_at, Some(fixed_now()));
    assert_eq!(record.current_section, 3);

    progress.reset();
    progress.load_progress().await.unwrap();
    assert!(progress.is_module_completed(&intro));
}

// ─── Loading ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_reload_keeps_previous_snapshot() {
    let repo = InMemoryRepository::new();
    let sections = Arc::new(FlakySections {
        inner: repo.clone(),
        down: AtomicBool::new(false),
    });
    let progress_repos = ProgressRepos {
        modules: Arc::new(repo.clone()),
        sections: sections.clone(),
        quiz_attempts: Arc::new(repo.clone()),
    };
    let (progress, _) = aggregator(
        UserId::random(),
        ProgressScope::Global,
        progress_repos,
        Clock::fixed(fixed_now()),
    );

    assert!(progress.update_module_progress(&module("1"), 2).await.is_committed());
    assert!(progress.mark_module_completed(&module("1")).await.is_committed());
    let before = progress.load_progress().await.unwrap();
    assert!(matches!(progress.load_state(), LoadState::Loaded { .. }));

    sections.down.store(true, Ordering::SeqCst);
    assert!(progress.load_progress().await.is_err());
    assert_eq!(progress.snapshot(), before);
    assert!(matches!(progress.load_state(), LoadState::Failed { .. }));
}

#[tokio::test]
async fn snapshot_export_round_trips_through_import() {
    let repo = InMemoryRepository::new();
    let user = UserId::random();
    let clock = Clock::fixed(fixed_now());
    let (progress, _) = aggregator(user, ProgressScope::Global, repos(&repo), clock);

    assert!(progress.update_module_progress(&module("1"), 4).await.is_committed());
    assert!(
        progress
            .save_quiz_score(&module("1"), 4, 5, &[], None)
            .await
            .is_committed()
    );
    let exported = progress.export_progress().unwrap();

    let (restored, _) = aggregator(user, ProgressScope::Global, repos(&InMemoryRepository::new()), clock);
    restored.import_progress(&exported).unwrap();
    assert_eq!(restored.snapshot(), progress.snapshot());

    assert!(restored.import_progress("{not json").is_err());
    assert_eq!(restored.snapshot(), progress.snapshot());
}

// ─── Quizzes ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn global_quizzes_pass_at_sixty_percent() {
    let repo = InMemoryRepository::new();
    let (progress, _) = aggregator(
        UserId::random(),
        ProgressScope::Global,
        repos(&repo),
        Clock::fixed(fixed_now()),
    );

    let failed = progress
        .save_quiz_score(&module("1"), 2, 5, &[], None)
        .await
        .into_result()
        .unwrap();
    assert!(!failed.result.passed);
    assert!(!failed.module_completed);
    assert!(!progress.is_module_completed(&module("1")));

    let passed = progress
        .save_quiz_score(&module("1"), 3, 5, &[], Some(90))
        .await
        .into_result()
        .unwrap();
    assert!(passed.result.passed);
    assert_eq!(passed.result.percentage, 60);
    assert!(passed.module_completed);
    assert!(progress.is_module_completed(&module("1")));
}

#[tokio::test]
async fn course_quizzes_need_seventy_percent() {
    let repo = InMemoryRepository::new();
    let (progress, _) = aggregator(
        UserId::random(),
        course_scope(),
        repos(&repo),
        Clock::fixed(fixed_now()),
    );

    let saved = progress
        .save_quiz_score(&module("1"), 3, 5, &[], None)
        .await
        .into_result()
        .unwrap();
    assert!(!saved.result.passed);
    assert!(!progress.is_module_completed(&module("1")));
}

#[tokio::test]
async fn attempts_are_numbered_per_module() {
    let repo = InMemoryRepository::new();
    let user = UserId::random();
    let (progress, _) = aggregator(user, ProgressScope::Global, repos(&repo), Clock::fixed(fixed_now()));

    let mut numbers = Vec::new();
    for score in [1, 2, 5] {
        let saved = progress
            .save_quiz_score(&module("3"), score, 5, &[], None)
            .await
            .into_result()
            .unwrap();
        numbers.push(saved.attempt_number);
    }
    assert_eq!(numbers, [1, 2, 3]);

    let other = progress
        .save_quiz_score(&module("4"), 5, 5, &[], None)
        .await
        .into_result()
        .unwrap();
    assert_eq!(other.attempt_number, 1);

    let attempts = repo.list_attempts(user, &ProgressScope::Global).await.unwrap();
    assert_eq!(attempts.len(), 4);
}

#[tokio::test]
async fn answer_failure_keeps_the_attempt() {
    let repo = InMemoryRepository::new();
    let user = UserId::random();
    let clock = Clock::fixed(fixed_now());
    let progress_repos = ProgressRepos {
        modules: Arc::new(repo.clone()),
        sections: Arc::new(repo.clone()),
        quiz_attempts: Arc::new(AnswerlessAttempts { inner: repo.clone() }),
    };
    let (progress, notifier) = aggregator(user, ProgressScope::Global, progress_repos, clock);

    let answers = [QuizAnswer::new(0, true), QuizAnswer::new(2, false)];
    let saved = progress
        .save_quiz_score(&module("1"), 1, 2, &answers, None)
        .await
        .into_result()
        .unwrap();
    assert!(!saved.answers_saved);
    assert_eq!(saved.attempt_number, 1);

    let attempts = repo.list_attempts(user, &ProgressScope::Global).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(repo.list_answers(saved.attempt_id).await.unwrap().is_empty());
    assert!(progress.quiz_result(&module("1")).is_some());
    assert_eq!(notifier.errors(clock.now()).len(), 1);
}

#[tokio::test]
async fn answers_are_stored_in_question_order() {
    let repo = InMemoryRepository::new();
    let (progress, _) = aggregator(
        UserId::random(),
        ProgressScope::Global,
        repos(&repo),
        Clock::fixed(fixed_now()),
    );

    let answers = [
        QuizAnswer::new(1, true),
        QuizAnswer::new(0, false),
        QuizAnswer::new(3, true),
    ];
    let saved = progress
        .save_quiz_score(&module("1"), 2, 3, &answers, None)
        .await
        .into_result()
        .unwrap();
    assert!(saved.answers_saved);

    let stored = repo.list_answers(saved.attempt_id).await.unwrap();
    let indexes: Vec<_> = stored.iter().map(|a| a.question_index).collect();
    assert_eq!(indexes, [0, 1, 2]);
    assert_eq!(stored[2].selected_answer, 3);
    assert!(!stored[1].is_correct);
}

#[tokio::test]
async fn invalid_scores_are_rejected() {
    let repo = InMemoryRepository::new();
    let user = UserId::random();
    let clock = Clock::fixed(fixed_now());
    let (progress, notifier) = aggregator(user, ProgressScope::Global, repos(&repo), clock);

    let outcome = progress.save_quiz_score(&module("1"), 6, 5, &[], None).await;
    assert!(!outcome.is_committed());
    assert!(repo.list_attempts(user, &ProgressScope::Global).await.unwrap().is_empty());
    assert_eq!(notifier.errors(clock.now()).len(), 1);
}
