use chrono::{DateTime, Utc};
use learnhub_core::model::{
    AttemptId, CategorySlug, CourseId, ModuleId, ModuleStatus, ProgressScope, ResourceId, UserId,
};
use serde::Deserialize;

use crate::repository::{
    CategoryFavoriteRecord, FavoriteRecord, ModuleRecord, QuizAnswerRecord, QuizAttemptRecord,
    ResourceViewRecord, SectionRecord, StorageError,
};

/// Global rows carry `module_id`; course rows carry the slug triple.
#[derive(Debug, Deserialize)]
pub(super) struct ScopeColumns {
    #[serde(default)]
    module_id: Option<ModuleId>,
    #[serde(default)]
    module_slug: Option<ModuleId>,
    #[serde(default)]
    category_slug: Option<CategorySlug>,
    #[serde(default)]
    course_slug: Option<CourseId>,
}

impl ScopeColumns {
    fn split(self) -> Result<(ProgressScope, ModuleId), StorageError> {
        let scope = match (self.category_slug, self.course_slug) {
            (Some(category), Some(course)) => ProgressScope::Course { category, course },
            _ => ProgressScope::Global,
        };
        let module = self
            .module_id
            .or(self.module_slug)
            .ok_or_else(|| StorageError::Serialization("row without module id".into()))?;
        Ok((scope, module))
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ModuleRow {
    user_id: UserId,
    #[serde(flatten)]
    key: ScopeColumns,
    status: ModuleStatus,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    current_section: Option<u32>,
}

impl TryFrom<ModuleRow> for ModuleRecord {
    type Error = StorageError;

    fn try_from(row: ModuleRow) -> Result<Self, Self::Error> {
        let (scope, module_id) = row.key.split()?;
        let updated_at = row
            .updated_at
            .or(row.last_accessed_at)
            .or(row.completed_at)
            .or(row.started_at)
            .or(row.created_at)
            .ok_or_else(|| StorageError::Serialization("module row without timestamps".into()))?;
        Ok(Self {
            user_id: row.user_id,
            scope,
            module_id,
            status: row.status,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at,
            current_section: row.current_section.unwrap_or(0),
        })
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct SectionRow {
    user_id: UserId,
    #[serde(flatten)]
    key: ScopeColumns,
    section_index: u32,
    completed_at: DateTime<Utc>,
}

impl TryFrom<SectionRow> for SectionRecord {
    type Error = StorageError;

    fn try_from(row: SectionRow) -> Result<Self, Self::Error> {
        let (scope, module_id) = row.key.split()?;
        Ok(Self {
            user_id: row.user_id,
            scope,
            module_id,
            section_index: row.section_index,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct AttemptRow {
    id: AttemptId,
    user_id: UserId,
    #[serde(flatten)]
    key: ScopeColumns,
    #[serde(default)]
    attempt_number: Option<u32>,
    score: u32,
    total_questions: u32,
    passed: bool,
    #[serde(default)]
    time_taken: Option<u32>,
    completed_at: DateTime<Utc>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl TryFrom<AttemptRow> for QuizAttemptRecord {
    type Error = StorageError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        let (scope, module_id) = row.key.split()?;
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            scope,
            module_id,
            attempt_number: row.attempt_number.unwrap_or(1),
            score: row.score,
            total_questions: row.total_questions,
            passed: row.passed,
            time_taken_secs: row.time_taken,
            completed_at: row.completed_at,
            created_at: row.created_at.unwrap_or(row.completed_at),
        })
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct AttemptNumberRow {
    #[serde(default)]
    pub attempt_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(super) struct AnswerRow {
    attempt_id: AttemptId,
    question_index: u32,
    selected_answer: u32,
    is_correct: bool,
}

impl From<AnswerRow> for QuizAnswerRecord {
    fn from(row: AnswerRow) -> Self {
        Self {
            attempt_id: row.attempt_id,
            question_index: row.question_index,
            selected_answer: row.selected_answer,
            is_correct: row.is_correct,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct FavoriteRow {
    user_id: UserId,
    course_id: CourseId,
    resource_id: ResourceId,
    favorited_at: DateTime<Utc>,
}

impl From<FavoriteRow> for FavoriteRecord {
    fn from(row: FavoriteRow) -> Self {
        Self {
            user_id: row.user_id,
            course_id: row.course_id,
            resource_id: row.resource_id,
            favorited_at: row.favorited_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct CategoryFavoriteRow {
    user_id: UserId,
    category_slug: CategorySlug,
    created_at: DateTime<Utc>,
}

impl From<CategoryFavoriteRow> for CategoryFavoriteRecord {
    fn from(row: CategoryFavoriteRow) -> Self {
        Self {
            user_id: row.user_id,
            category: row.category_slug,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ViewRow {
    user_id: UserId,
    course_id: CourseId,
    resource_id: ResourceId,
    view_count: u64,
    viewed_at: DateTime<Utc>,
}

impl From<ViewRow> for ResourceViewRecord {
    fn from(row: ViewRow) -> Self {
        Self {
            user_id: row.user_id,
            course_id: row.course_id,
            resource_id: row.resource_id,
            view_count: row.view_count,
            viewed_at: row.viewed_at,
        }
    }
}

/// Convert a batch of rows, failing on the first bad one.
pub(super) fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StorageError>
where
    T: TryFrom<R, Error = StorageError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn course_module_row_resolves_scope() {
        let user = UserId::random();
        let row: ModuleRow = serde_json::from_value(json!({
            "id": 17,
            "user_id": user,
            "category_slug": "software-dev",
            "course_slug": "rust",
            "module_slug": "ownership",
            "status": "in_progress",
            "started_at": "2024-01-01T00:00:00Z",
            "last_accessed_at": "2024-01-02T00:00:00Z",
            "current_section": 3
        }))
        .unwrap();
        let record = ModuleRecord::try_from(row).unwrap();
        assert_eq!(
            record.scope,
            ProgressScope::course(CategorySlug::new("software-dev"), CourseId::new("rust"))
        );
        assert_eq!(record.module_id, ModuleId::new("ownership"));
        assert_eq!(record.current_section, 3);
        assert_eq!(record.updated_at.to_rfc3339(), "2024-01-02T00:00:00+00:00");
    }

    #[test]
    fn global_attempt_row_defaults_attempt_number() {
        let row: AttemptRow = serde_json::from_value(json!({
            "id": AttemptId::random(),
            "user_id": UserId::random(),
            "module_id": 4,
            "score": 3,
            "total_questions": 5,
            "passed": true,
            "completed_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        let record = QuizAttemptRecord::try_from(row).unwrap();
        assert_eq!(record.scope, ProgressScope::Global);
        assert_eq!(record.module_id, ModuleId::new("4"));
        assert_eq!(record.attempt_number, 1);
        assert_eq!(record.created_at, record.completed_at);
    }
}
