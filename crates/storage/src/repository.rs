use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use learnhub_core::model::{
    AttemptId, CategorySlug, CourseId, ModuleId, ModuleStatus, NewProfile, PopularResource,
    Profile, ProfileUpdate, ProgressScope, ResourceId, ResourceStats, SearchHit, UserId,
};
use thiserror::Error;

pub use crate::memory::InMemoryRepository;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

/// Errors surfaced by storage adapters.
///
/// Remote backends report failures as provider codes; [`StorageError::from_provider`]
/// is the only place those codes are interpreted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("duplicate key")]
    Duplicate,

    #[error("referenced row is missing")]
    MissingReference,

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("remote error {code}: {message}")]
    Remote { code: String, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Classify a provider error code.
    #[must_use]
    pub fn from_provider(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "23505" => Self::Duplicate,
            "23503" => Self::MissingReference,
            "PGRST116" => Self::NotFound,
            "PGRST204" => Self::SchemaMismatch(message),
            "42P17" => Self::PermissionDenied,
            _ => Self::Remote {
                code: code.to_string(),
                message,
            },
        }
    }

    /// Short message suitable for showing to an end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound => "No data found.".into(),
            Self::Duplicate => "This item already exists.".into(),
            Self::MissingReference => "Invalid reference. Please refresh and try again.".into(),
            Self::SchemaMismatch(_) => {
                "Database configuration error. Please contact support.".into()
            }
            Self::PermissionDenied => {
                "Permission configuration error. Please contact support.".into()
            }
            Self::Network(_) | Self::Connection(_) => {
                "Network error. Please check your connection.".into()
            }
            Self::Remote { message, .. } if !message.trim().is_empty() => message.clone(),
            Self::Remote { .. } | Self::Serialization(_) => {
                "An unexpected error occurred.".into()
            }
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

//
// ─── RECORDS ──────────────────────────────────────────────────────────────────
//

/// Persisted module progress row, unique per `(user, scope, module)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub user_id: UserId,
    pub scope: ProgressScope,
    pub module_id: ModuleId,
    pub status: ModuleStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub current_section: u32,
}

impl ModuleRecord {
    /// A fresh `started` row.
    #[must_use]
    pub fn started(
        user_id: UserId,
        scope: ProgressScope,
        module_id: ModuleId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            scope,
            module_id,
            status: ModuleStatus::Started,
            started_at: Some(at),
            completed_at: None,
            updated_at: at,
            current_section: 0,
        }
    }
}

/// Persisted section visit, unique per `(user, scope, module, section)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRecord {
    pub user_id: UserId,
    pub scope: ProgressScope,
    pub module_id: ModuleId,
    pub section_index: u32,
    pub completed_at: DateTime<Utc>,
}

/// Append-only quiz attempt row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizAttemptRecord {
    pub id: AttemptId,
    pub user_id: UserId,
    pub scope: ProgressScope,
    pub module_id: ModuleId,
    pub attempt_number: u32,
    pub score: u32,
    pub total_questions: u32,
    pub passed: bool,
    pub time_taken_secs: Option<u32>,
    pub completed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Attempt payload before the backend assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuizAttempt {
    pub user_id: UserId,
    pub scope: ProgressScope,
    pub module_id: ModuleId,
    pub attempt_number: u32,
    pub score: u32,
    pub total_questions: u32,
    pub passed: bool,
    pub time_taken_secs: Option<u32>,
    pub completed_at: DateTime<Utc>,
}

impl NewQuizAttempt {
    #[must_use]
    pub fn into_record(self, id: AttemptId, created_at: DateTime<Utc>) -> QuizAttemptRecord {
        QuizAttemptRecord {
            id,
            user_id: self.user_id,
            scope: self.scope,
            module_id: self.module_id,
            attempt_number: self.attempt_number,
            score: self.score,
            total_questions: self.total_questions,
            passed: self.passed,
            time_taken_secs: self.time_taken_secs,
            completed_at: self.completed_at,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizAnswerRecord {
    pub attempt_id: AttemptId,
    pub question_index: u32,
    pub selected_answer: u32,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FavoriteRecord {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub resource_id: ResourceId,
    pub favorited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryFavoriteRecord {
    pub user_id: UserId,
    pub category: CategorySlug,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceViewRecord {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub resource_id: ResourceId,
    pub view_count: u64,
    pub viewed_at: DateTime<Utc>,
}

//
// ─── PROGRESS ─────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait ModuleProgressRepository: Send + Sync {
    /// All module rows for a user within a scope.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn list_modules(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<ModuleRecord>, StorageError>;

    /// Fetch one module row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the row does not exist.
    async fn get_module(
        &self,
        user: UserId,
        scope: &ProgressScope,
        module: &ModuleId,
    ) -> Result<ModuleRecord, StorageError>;

    /// Insert or replace the row keyed by `(user, scope, module)`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn upsert_module(&self, record: &ModuleRecord) -> Result<(), StorageError>;
}

#[async_trait]
pub trait SectionProgressRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn list_sections(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<SectionRecord>, StorageError>;

    /// Insert or refresh the row keyed by `(user, scope, module, section)`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn upsert_section(&self, record: &SectionRecord) -> Result<(), StorageError>;
}

#[async_trait]
pub trait QuizAttemptRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn list_attempts(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<QuizAttemptRecord>, StorageError>;

    /// Highest attempt number recorded for a module, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn latest_attempt_number(
        &self,
        user: UserId,
        scope: &ProgressScope,
        module: &ModuleId,
    ) -> Result<Option<u32>, StorageError>;

    /// Append an attempt and return the stored row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the attempt cannot be stored.
    async fn insert_attempt(
        &self,
        attempt: &NewQuizAttempt,
    ) -> Result<QuizAttemptRecord, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::MissingReference` if the attempt does not exist.
    async fn insert_answers(&self, answers: &[QuizAnswerRecord]) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn list_answers(
        &self,
        attempt: AttemptId,
    ) -> Result<Vec<QuizAnswerRecord>, StorageError>;
}

//
// ─── PROFILES ─────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user has no profile row.
    async fn get_profile(&self, user: UserId) -> Result<Profile, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::Duplicate` if the profile already exists.
    async fn insert_profile(
        &self,
        profile: &NewProfile,
        at: DateTime<Utc>,
    ) -> Result<Profile, StorageError>;

    /// Apply an update and return the stored row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user has no profile row.
    async fn update_profile(
        &self,
        user: UserId,
        update: &ProfileUpdate,
        at: DateTime<Utc>,
    ) -> Result<Profile, StorageError>;
}

/// Object storage for avatar images.
#[async_trait]
pub trait AvatarStore: Send + Sync {
    /// Upload under `path` (relative to the avatars bucket) and return the public URL.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the upload fails.
    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the object cannot be removed.
    async fn remove(&self, path: &str) -> Result<(), StorageError>;

    /// Bucket-relative path for a URL previously returned by `upload`.
    fn path_from_url(&self, url: &str) -> Option<String>;
}

//
// ─── RESOURCES ────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait FavoriteRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be read.
    async fn is_favorite(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<bool, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::Duplicate` if the resource is already a favorite.
    async fn insert_favorite(&self, record: &FavoriteRecord) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be removed.
    async fn delete_favorite(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<(), StorageError>;

    /// Favorites newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn list_favorites(&self, user: UserId) -> Result<Vec<FavoriteRecord>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn list_category_favorites(
        &self,
        user: UserId,
    ) -> Result<Vec<CategoryFavoriteRecord>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::Duplicate` if the category is already a favorite.
    async fn insert_category_favorite(
        &self,
        record: &CategoryFavoriteRecord,
    ) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be removed.
    async fn delete_category_favorite(
        &self,
        user: UserId,
        category: &CategorySlug,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ResourceViewRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user never viewed the resource.
    async fn get_view(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<ResourceViewRecord, StorageError>;

    /// Insert or replace the row keyed by `(user, course, resource)`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn upsert_view(&self, record: &ResourceViewRecord) -> Result<(), StorageError>;

    /// Most recent views first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn recent_views(
        &self,
        user: UserId,
        limit: u32,
    ) -> Result<Vec<ResourceViewRecord>, StorageError>;
}

/// Server-side aggregate queries over resource views.
#[async_trait]
pub trait ResourceAnalyticsRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn resource_analytics(
        &self,
        course: &CourseId,
    ) -> Result<Vec<ResourceStats>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn popular_resources(&self, limit: u32) -> Result<Vec<PopularResource>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn search_resources(
        &self,
        query: &str,
        course: Option<&CourseId>,
        kind: Option<&str>,
    ) -> Result<Vec<SearchHit>, StorageError>;
}

//
// ─── ADMIN ────────────────────────────────────────────────────────────────────
//

/// Cross-user reads; the backend is expected to enforce admin-only access.
#[async_trait]
pub trait AdminRepository: Send + Sync {
    /// All profiles, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn list_profiles(&self) -> Result<Vec<Profile>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn list_all_modules(
        &self,
        scope: &ProgressScope,
    ) -> Result<Vec<ModuleRecord>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn list_all_attempts(
        &self,
        scope: &ProgressScope,
    ) -> Result<Vec<QuizAttemptRecord>, StorageError>;
}

//
// ─── AGGREGATE ────────────────────────────────────────────────────────────────
//

/// Aggregates every repository behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub modules: Arc<dyn ModuleProgressRepository>,
    pub sections: Arc<dyn SectionProgressRepository>,
    pub quiz_attempts: Arc<dyn QuizAttemptRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub avatars: Arc<dyn AvatarStore>,
    pub favorites: Arc<dyn FavoriteRepository>,
    pub resource_views: Arc<dyn ResourceViewRepository>,
    pub resource_analytics: Arc<dyn ResourceAnalyticsRepository>,
    pub admin: Arc<dyn AdminRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(InMemoryRepository::new())
    }

    /// Wrap an existing in-memory repository, keeping a handle for seeding.
    #[must_use]
    pub fn from_in_memory(repo: InMemoryRepository) -> Self {
        Self {
            modules: Arc::new(repo.clone()),
            sections: Arc::new(repo.clone()),
            quiz_attempts: Arc::new(repo.clone()),
            profiles: Arc::new(repo.clone()),
            avatars: Arc::new(repo.clone()),
            favorites: Arc::new(repo.clone()),
            resource_views: Arc::new(repo.clone()),
            resource_analytics: Arc::new(repo.clone()),
            admin: Arc::new(repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_codes_map_to_variants() {
        assert_eq!(StorageError::from_provider("23505", "dup"), StorageError::Duplicate);
        assert_eq!(
            StorageError::from_provider("23503", "fk"),
            StorageError::MissingReference
        );
        assert_eq!(StorageError::from_provider("PGRST116", "0 rows"), StorageError::NotFound);
        assert_eq!(
            StorageError::from_provider("PGRST204", "column x"),
            StorageError::SchemaMismatch("column x".into())
        );
        assert_eq!(
            StorageError::from_provider("42P17", "recursion"),
            StorageError::PermissionDenied
        );
        assert_eq!(
            StorageError::from_provider("XX000", "boom"),
            StorageError::Remote {
                code: "XX000".into(),
                message: "boom".into()
            }
        );
    }

    #[test]
    fn user_messages_hide_internals() {
        assert_eq!(
            StorageError::Duplicate.user_message(),
            "This item already exists."
        );
        assert_eq!(
            StorageError::Serialization("bad json".into()).user_message(),
            "An unexpected error occurred."
        );
        assert_eq!(
            StorageError::from_provider("P0001", "quota exceeded").user_message(),
            "quota exceeded"
        );
        assert!(
            StorageError::Network("reset".into())
                .user_message()
                .contains("connection")
        );
    }
}
