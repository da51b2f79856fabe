use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use learnhub_core::model::{
    AdminAnalytics, AdminModuleRow, AdminQuizRow, AttemptId, ModuleId, Profile, ProgressScope,
    UserId, UserProgressOverview, users_csv,
};
use serde::Serialize;
use storage::repository::{
    AdminRepository, ModuleRecord, ProfileRepository, QuizAttemptRecord, StorageError,
};

use crate::Clock;
use crate::auth::AuthState;
use crate::error::AdminError;
use crate::progress::ProgressRepos;

/// Section visit in the per-user detail view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminSectionRow {
    pub module_id: ModuleId,
    pub section_index: u32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdminAnswerRow {
    pub question_index: u32,
    pub selected_answer: u32,
    pub is_correct: bool,
}

/// Quiz attempt with its stored answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminAttemptDetail {
    pub id: AttemptId,
    pub module_id: ModuleId,
    pub attempt_number: u32,
    pub score: u32,
    pub total_questions: u32,
    pub passed: bool,
    pub completed_at: DateTime<Utc>,
    pub answers: Vec<AdminAnswerRow>,
}

/// Everything stored for one learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProgressDetail {
    pub profile: Profile,
    pub modules: Vec<AdminModuleRow>,
    pub sections: Vec<AdminSectionRow>,
    pub quiz_attempts: Vec<AdminAttemptDetail>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressExport<'a> {
    exported_at: DateTime<Utc>,
    total_users: usize,
    users: &'a [UserProgressOverview],
}

#[derive(Default)]
struct Dashboard {
    is_admin: bool,
    users: Vec<UserProgressOverview>,
    last_updated: Option<DateTime<Utc>>,
}

/// Cross-user progress views for administrators.
///
/// Admin status is checked once per session with
/// [`AdminService::check_admin_status`]; every other query is refused until
/// that check has passed.
pub struct AdminService {
    auth: Arc<AuthState>,
    profiles: Arc<dyn ProfileRepository>,
    admin: Arc<dyn AdminRepository>,
    progress: ProgressRepos,
    scope: ProgressScope,
    clock: Clock,
    dashboard: RwLock<Dashboard>,
}

impl AdminService {
    #[must_use]
    pub fn new(
        clock: Clock,
        auth: Arc<AuthState>,
        profiles: Arc<dyn ProfileRepository>,
        admin: Arc<dyn AdminRepository>,
        progress: ProgressRepos,
        scope: ProgressScope,
    ) -> Self {
        Self {
            auth,
            profiles,
            admin,
            progress,
            scope,
            clock,
            dashboard: RwLock::new(Dashboard::default()),
        }
    }

    #[must_use]
    pub fn scope(&self) -> &ProgressScope {
        &self.scope
    }

    /// Whether the signed-in user is an administrator. Any failure counts as
    /// "no".
    pub async fn check_admin_status(&self) -> bool {
        let is_admin = match self.auth.current_user() {
            None => false,
            Some(user) => match self.profiles.get_profile(user.id).await {
                Ok(profile) => profile.is_admin,
                Err(err) => {
                    tracing::warn!(user = %user.id, error = %err, "admin check failed");
                    false
                }
            },
        };
        self.dashboard_mut().is_admin = is_admin;
        is_admin
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.dashboard().is_admin
    }

    fn require_admin(&self) -> Result<(), AdminError> {
        self.auth.require_user()?;
        if self.is_admin() {
            Ok(())
        } else {
            tracing::warn!("admin access denied");
            Err(AdminError::AccessDenied)
        }
    }

    /// Every profile with its module and quiz rows, newest account first.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::AccessDenied` unless the admin check passed and
    /// `AdminError::Storage` if any read fails.
    pub async fn load_all_users(&self) -> Result<Vec<UserProgressOverview>, AdminError> {
        self.require_admin()?;
        let (profiles, modules, attempts) = tokio::try_join!(
            self.admin.list_profiles(),
            self.admin.list_all_modules(&self.scope),
            self.admin.list_all_attempts(&self.scope),
        )?;

        let users = overviews(profiles, modules, attempts);
        tracing::info!(users = users.len(), scope = ?self.scope, "admin users loaded");

        let mut dashboard = self.dashboard_mut();
        dashboard.users.clone_from(&users);
        dashboard.last_updated = Some(self.clock.now());
        Ok(users)
    }

    /// Detailed progress for one learner, including quiz answers.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::AccessDenied` unless the admin check passed,
    /// `AdminError::NotFound` for an unknown user and `AdminError::Storage`
    /// if any read fails.
    pub async fn user_progress(&self, user: UserId) -> Result<UserProgressDetail, AdminError> {
        self.require_admin()?;
        let profile = self.profiles.get_profile(user).await.map_err(|err| match err {
            StorageError::NotFound => AdminError::NotFound,
            other => AdminError::Storage(other),
        })?;

        let (mut modules, mut sections, mut attempts) = tokio::try_join!(
            self.progress.modules.list_modules(user, &self.scope),
            self.progress.sections.list_sections(user, &self.scope),
            self.progress.quiz_attempts.list_attempts(user, &self.scope),
        )?;
        modules.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        sections.sort_by(|a, b| {
            (&a.module_id, a.section_index).cmp(&(&b.module_id, b.section_index))
        });
        attempts.sort_by_key(|a| a.completed_at);

        let mut quiz_attempts = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            let answers = self
                .progress
                .quiz_attempts
                .list_answers(attempt.id)
                .await?
                .into_iter()
                .map(|a| AdminAnswerRow {
                    question_index: a.question_index,
                    selected_answer: a.selected_answer,
                    is_correct: a.is_correct,
                })
                .collect();
            quiz_attempts.push(AdminAttemptDetail {
                id: attempt.id,
                module_id: attempt.module_id,
                attempt_number: attempt.attempt_number,
                score: attempt.score,
                total_questions: attempt.total_questions,
                passed: attempt.passed,
                completed_at: attempt.completed_at,
                answers,
            });
        }

        Ok(UserProgressDetail {
            profile,
            modules: modules.iter().map(module_row).collect(),
            sections: sections
                .into_iter()
                .map(|s| AdminSectionRow {
                    module_id: s.module_id,
                    section_index: s.section_index,
                    completed_at: s.completed_at,
                })
                .collect(),
            quiz_attempts,
        })
    }

    /// Users from the last successful [`AdminService::load_all_users`].
    #[must_use]
    pub fn users(&self) -> Vec<UserProgressOverview> {
        self.dashboard().users.clone()
    }

    #[must_use]
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.dashboard().last_updated
    }

    /// Roll-up over the loaded users.
    #[must_use]
    pub fn analytics(&self) -> AdminAnalytics {
        AdminAnalytics::from_users(&self.dashboard().users)
    }

    /// # Errors
    ///
    /// Returns `AdminError::AccessDenied` unless the admin check passed.
    pub fn export_users_csv(&self) -> Result<String, AdminError> {
        self.require_admin()?;
        Ok(users_csv(&self.dashboard().users))
    }

    /// Pretty JSON of the loaded users with export metadata.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::AccessDenied` unless the admin check passed and
    /// `AdminError::Serialization` if encoding fails.
    pub fn export_progress_json(&self) -> Result<String, AdminError> {
        self.require_admin()?;
        let dashboard = self.dashboard();
        let export = ProgressExport {
            exported_at: self.clock.now(),
            total_users: dashboard.users.len(),
            users: &dashboard.users,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Download names for the two exports, stamped with today's date.
    #[must_use]
    pub fn export_file_names(&self) -> (String, String) {
        let day = self.clock.now().format("%Y-%m-%d");
        (
            format!("claude-learn-users-{day}.csv"),
            format!("claude-learn-progress-{day}.json"),
        )
    }

    fn dashboard(&self) -> std::sync::RwLockReadGuard<'_, Dashboard> {
        self.dashboard.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn dashboard_mut(&self) -> std::sync::RwLockWriteGuard<'_, Dashboard> {
        self.dashboard.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn module_row(record: &ModuleRecord) -> AdminModuleRow {
    AdminModuleRow {
        module_id: record.module_id.clone(),
        status: record.status,
        started_at: record.started_at,
        completed_at: record.completed_at,
    }
}

fn quiz_row(record: &QuizAttemptRecord) -> AdminQuizRow {
    AdminQuizRow {
        module_id: record.module_id.clone(),
        score: record.score,
        total_questions: record.total_questions,
        passed: record.passed,
        completed_at: record.completed_at,
    }
}

/// Attach module and attempt rows to their profiles, keeping profile order.
fn overviews(
    profiles: Vec<Profile>,
    modules: Vec<ModuleRecord>,
    attempts: Vec<QuizAttemptRecord>,
) -> Vec<UserProgressOverview> {
    let mut modules_by_user: HashMap<UserId, Vec<AdminModuleRow>> = HashMap::new();
    for record in &modules {
        modules_by_user
            .entry(record.user_id)
            .or_default()
            .push(module_row(record));
    }
    let mut attempts_by_user: HashMap<UserId, Vec<AdminQuizRow>> = HashMap::new();
    for record in &attempts {
        attempts_by_user
            .entry(record.user_id)
            .or_default()
            .push(quiz_row(record));
    }

    profiles
        .into_iter()
        .map(|profile| UserProgressOverview {
            modules: modules_by_user.remove(&profile.id).unwrap_or_default(),
            quiz_attempts: attempts_by_user.remove(&profile.id).unwrap_or_default(),
            id: profile.id,
            email: profile.email,
            full_name: profile.full_name,
            avatar_url: profile.avatar_url,
            is_admin: profile.is_admin,
            created_at: profile.created_at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnhub_core::model::ModuleStatus;
    use learnhub_core::time::fixed_now;

    fn profile(email: &str, minutes: i64) -> Profile {
        Profile {
            id: UserId::random(),
            email: email.into(),
            full_name: None,
            avatar_url: None,
            is_admin: false,
            created_at: fixed_now() + chrono::Duration::minutes(minutes),
            updated_at: None,
        }
    }

    #[test]
    fn overviews_group_rows_by_user() {
        let a = profile("a@x.io", 2);
        let b = profile("b@x.io", 1);
        let mut done = ModuleRecord::started(
            a.id,
            ProgressScope::Global,
            ModuleId::new("1"),
            fixed_now(),
        );
        done.status = ModuleStatus::Completed;
        let other = ModuleRecord::started(
            b.id,
            ProgressScope::Global,
            ModuleId::new("1"),
            fixed_now(),
        );

        let users = overviews(vec![a.clone(), b.clone()], vec![done, other], vec![]);
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].email, "a@x.io");
        assert_eq!(users[0].modules_completed(), 1);
        assert_eq!(users[1].modules.len(), 1);
        assert!(users[1].quiz_attempts.is_empty());
    }
}
