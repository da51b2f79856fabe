use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{ModuleId, UserId};
use crate::model::progress::ModuleStatus;
use crate::model::quiz::rounded_percent;

/// Module row as seen by the admin overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminModuleRow {
    pub module_id: ModuleId,
    pub status: ModuleStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Quiz attempt row as seen by the admin overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminQuizRow {
    pub module_id: ModuleId,
    pub score: u32,
    pub total_questions: u32,
    pub passed: bool,
    pub completed_at: DateTime<Utc>,
}

/// One user's profile together with their raw progress rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgressOverview {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modules: Vec<AdminModuleRow>,
    #[serde(default)]
    pub quiz_attempts: Vec<AdminQuizRow>,
}

impl UserProgressOverview {
    #[must_use]
    pub fn modules_completed(&self) -> usize {
        self.modules
            .iter()
            .filter(|m| m.status.is_completed())
            .count()
    }

    #[must_use]
    pub fn quizzes_passed(&self) -> usize {
        self.quiz_attempts.iter().filter(|q| q.passed).count()
    }

    #[must_use]
    pub fn pass_rate(&self) -> u32 {
        rounded_percent(self.quizzes_passed() as u64, self.quiz_attempts.len() as u64)
    }
}

/// Platform-wide roll-up shown on the admin dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAnalytics {
    pub total_users: usize,
    pub active_users: usize,
    pub completed_modules: usize,
    pub average_progress: u32,
    pub quizzes_taken: usize,
    pub pass_rate: u32,
}

impl AdminAnalytics {
    #[must_use]
    pub fn from_users(users: &[UserProgressOverview]) -> Self {
        if users.is_empty() {
            return Self::default();
        }

        let mut started = 0_usize;
        let mut completed = 0_usize;
        let mut quizzes = 0_usize;
        let mut passed = 0_usize;
        for user in users {
            started += user.modules.len();
            completed += user.modules_completed();
            quizzes += user.quiz_attempts.len();
            passed += user.quizzes_passed();
        }

        Self {
            total_users: users.len(),
            active_users: users.iter().filter(|u| !u.modules.is_empty()).count(),
            completed_modules: completed,
            average_progress: rounded_percent(completed as u64, started as u64),
            quizzes_taken: quizzes,
            pass_rate: rounded_percent(passed as u64, quizzes as u64),
        }
    }
}

const CSV_HEADER: [&str; 7] = [
    "Email",
    "Full Name",
    "Created At",
    "Modules Started",
    "Modules Completed",
    "Quizzes Taken",
    "Quiz Pass Rate",
];

/// Render the users table as CSV, one row per user.
#[must_use]
pub fn users_csv(users: &[UserProgressOverview]) -> String {
    let mut lines = Vec::with_capacity(users.len() + 1);
    lines.push(CSV_HEADER.join(","));
    for user in users {
        let row = [
            csv_field(&user.email),
            csv_field(user.full_name.as_deref().unwrap_or("N/A")),
            user.created_at.format("%Y-%m-%d").to_string(),
            user.modules.len().to_string(),
            user.modules_completed().to_string(),
            user.quiz_attempts.len().to_string(),
            format!("{}%", user.pass_rate()),
        ];
        lines.push(row.join(","));
    }
    lines.join("\n")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
