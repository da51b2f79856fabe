use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use learnhub_core::model::{
    AttemptId, CategorySlug, CourseId, ModuleId, NewProfile, PopularResource, Profile,
    ProfileUpdate, ProgressScope, Resource, ResourceCatalog, ResourceId, ResourceStats, SearchHit,
    UserId,
};

use crate::repository::{
    AdminRepository, AvatarStore, CategoryFavoriteRecord, FavoriteRecord, FavoriteRepository,
    ModuleProgressRepository, ModuleRecord, NewQuizAttempt, ProfileRepository, QuizAnswerRecord,
    QuizAttemptRecord, QuizAttemptRepository, ResourceAnalyticsRepository, ResourceViewRecord,
    ResourceViewRepository, SectionProgressRepository, SectionRecord, StorageError,
};

const MEMORY_AVATAR_PREFIX: &str = "memory://avatars/";

type ModuleKey = (UserId, ProgressScope, ModuleId);
type SectionKey = (UserId, ProgressScope, ModuleId, u32);
type ResourceKey = (UserId, CourseId, ResourceId);

#[derive(Default)]
struct Tables {
    modules: HashMap<ModuleKey, ModuleRecord>,
    sections: HashMap<SectionKey, SectionRecord>,
    attempts: Vec<QuizAttemptRecord>,
    answers: Vec<QuizAnswerRecord>,
    profiles: HashMap<UserId, Profile>,
    avatars: HashMap<String, (String, Vec<u8>)>,
    favorites: HashMap<ResourceKey, FavoriteRecord>,
    category_favorites: HashMap<(UserId, CategorySlug), CategoryFavoriteRecord>,
    views: HashMap<ResourceKey, ResourceViewRecord>,
    resources: HashMap<CourseId, Vec<Resource>>,
}

/// Simple in-memory backend for testing and guest sessions.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Register static resource metadata so the analytics queries can join on it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn register_resources(
        &self,
        course: CourseId,
        catalog: &ResourceCatalog,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.resources.insert(course, catalog.resources.clone());
        Ok(())
    }

    /// Insert or replace a profile directly, e.g. to seed an admin.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn put_profile(&self, profile: Profile) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.profiles.insert(profile.id, profile);
        Ok(())
    }

    /// Number of stored avatar objects.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn avatar_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.avatars.len())
    }
}

// ─── Progress ──────────────────────────────────────────────────────────────────

#[async_trait]
impl ModuleProgressRepository for InMemoryRepository {
    async fn list_modules(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<ModuleRecord>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .modules
            .values()
            .filter(|r| r.user_id == user && &r.scope == scope)
            .cloned()
            .collect())
    }

    async fn get_module(
        &self,
        user: UserId,
        scope: &ProgressScope,
        module: &ModuleId,
    ) -> Result<ModuleRecord, StorageError> {
        let guard = self.lock()?;
        guard
            .modules
            .get(&(user, scope.clone(), module.clone()))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn upsert_module(&self, record: &ModuleRecord) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.modules.insert(
            (record.user_id, record.scope.clone(), record.module_id.clone()),
            record.clone(),
        );
        Ok(())
    }
}

#[async_trait]
impl SectionProgressRepository for InMemoryRepository {
    async fn list_sections(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<SectionRecord>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .sections
            .values()
            .filter(|r| r.user_id == user && &r.scope == scope)
            .cloned()
            .collect())
    }

    async fn upsert_section(&self, record: &SectionRecord) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.sections.insert(
            (
                record.user_id,
                record.scope.clone(),
                record.module_id.clone(),
                record.section_index,
            ),
            record.clone(),
        );
        Ok(())
    }
}

#[async_trait]
impl QuizAttemptRepository for InMemoryRepository {
    async fn list_attempts(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<QuizAttemptRecord>, StorageError> {
        let guard = self.lock()?;
        let mut attempts: Vec<_> = guard
            .attempts
            .iter()
            .filter(|a| a.user_id == user && &a.scope == scope)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(attempts)
    }

    async fn latest_attempt_number(
        &self,
        user: UserId,
        scope: &ProgressScope,
        module: &ModuleId,
    ) -> Result<Option<u32>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .attempts
            .iter()
            .filter(|a| a.user_id == user && &a.scope == scope && &a.module_id == module)
            .map(|a| a.attempt_number)
            .max())
    }

    async fn insert_attempt(
        &self,
        attempt: &NewQuizAttempt,
    ) -> Result<QuizAttemptRecord, StorageError> {
        let mut guard = self.lock()?;
        let duplicate = guard.attempts.iter().any(|a| {
            a.user_id == attempt.user_id
                && a.scope == attempt.scope
                && a.module_id == attempt.module_id
                && a.attempt_number == attempt.attempt_number
        });
        if duplicate {
            return Err(StorageError::Duplicate);
        }
        let record = attempt
            .clone()
            .into_record(AttemptId::random(), attempt.completed_at);
        guard.attempts.push(record.clone());
        Ok(record)
    }

    async fn insert_answers(&self, answers: &[QuizAnswerRecord]) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        for answer in answers {
            if !guard.attempts.iter().any(|a| a.id == answer.attempt_id) {
                return Err(StorageError::MissingReference);
            }
        }
        guard.answers.extend_from_slice(answers);
        Ok(())
    }

    async fn list_answers(
        &self,
        attempt: AttemptId,
    ) -> Result<Vec<QuizAnswerRecord>, StorageError> {
        let guard = self.lock()?;
        let mut answers: Vec<_> = guard
            .answers
            .iter()
            .filter(|a| a.attempt_id == attempt)
            .copied()
            .collect();
        answers.sort_by_key(|a| a.question_index);
        Ok(answers)
    }
}

// ─── Profiles ──────────────────────────────────────────────────────────────────

#[async_trait]
impl ProfileRepository for InMemoryRepository {
    async fn get_profile(&self, user: UserId) -> Result<Profile, StorageError> {
        let guard = self.lock()?;
        guard.profiles.get(&user).cloned().ok_or(StorageError::NotFound)
    }

    async fn insert_profile(
        &self,
        profile: &NewProfile,
        at: DateTime<Utc>,
    ) -> Result<Profile, StorageError> {
        let mut guard = self.lock()?;
        if guard.profiles.contains_key(&profile.id) {
            return Err(StorageError::Duplicate);
        }
        let stored = profile.clone().into_profile(at);
        guard.profiles.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_profile(
        &self,
        user: UserId,
        update: &ProfileUpdate,
        at: DateTime<Utc>,
    ) -> Result<Profile, StorageError> {
        let mut guard = self.lock()?;
        let profile = guard.profiles.get_mut(&user).ok_or(StorageError::NotFound)?;
        update.apply_to(profile, at);
        Ok(profile.clone())
    }
}

#[async_trait]
impl AvatarStore for InMemoryRepository {
    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let mut guard = self.lock()?;
        if guard.avatars.contains_key(path) {
            return Err(StorageError::Duplicate);
        }
        guard
            .avatars
            .insert(path.to_string(), (content_type.to_string(), bytes.to_vec()));
        Ok(format!("{MEMORY_AVATAR_PREFIX}{path}"))
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard
            .avatars
            .remove(path)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    fn path_from_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(MEMORY_AVATAR_PREFIX).map(str::to_string)
    }
}

// ─── Resources ─────────────────────────────────────────────────────────────────

#[async_trait]
impl FavoriteRepository for InMemoryRepository {
    async fn is_favorite(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<bool, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .favorites
            .contains_key(&(user, course.clone(), resource.clone())))
    }

    async fn insert_favorite(&self, record: &FavoriteRecord) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let key = (
            record.user_id,
            record.course_id.clone(),
            record.resource_id.clone(),
        );
        if guard.favorites.contains_key(&key) {
            return Err(StorageError::Duplicate);
        }
        guard.favorites.insert(key, record.clone());
        Ok(())
    }

    async fn delete_favorite(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard
            .favorites
            .remove(&(user, course.clone(), resource.clone()));
        Ok(())
    }

    async fn list_favorites(&self, user: UserId) -> Result<Vec<FavoriteRecord>, StorageError> {
        let guard = self.lock()?;
        let mut out: Vec<_> = guard
            .favorites
            .values()
            .filter(|f| f.user_id == user)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.favorited_at.cmp(&a.favorited_at));
        Ok(out)
    }

    async fn list_category_favorites(
        &self,
        user: UserId,
    ) -> Result<Vec<CategoryFavoriteRecord>, StorageError> {
        let guard = self.lock()?;
        let mut out: Vec<_> = guard
            .category_favorites
            .values()
            .filter(|f| f.user_id == user)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn insert_category_favorite(
        &self,
        record: &CategoryFavoriteRecord,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let key = (record.user_id, record.category.clone());
        if guard.category_favorites.contains_key(&key) {
            return Err(StorageError::Duplicate);
        }
        guard.category_favorites.insert(key, record.clone());
        Ok(())
    }

    async fn delete_category_favorite(
        &self,
        user: UserId,
        category: &CategorySlug,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.category_favorites.remove(&(user, category.clone()));
        Ok(())
    }
}

#[async_trait]
impl ResourceViewRepository for InMemoryRepository {
    async fn get_view(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<ResourceViewRecord, StorageError> {
        let guard = self.lock()?;
        guard
            .views
            .get(&(user, course.clone(), resource.clone()))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn upsert_view(&self, record: &ResourceViewRecord) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.views.insert(
            (
                record.user_id,
                record.course_id.clone(),
                record.resource_id.clone(),
            ),
            record.clone(),
        );
        Ok(())
    }

    async fn recent_views(
        &self,
        user: UserId,
        limit: u32,
    ) -> Result<Vec<ResourceViewRecord>, StorageError> {
        let guard = self.lock()?;
        let mut out: Vec<_> = guard
            .views
            .values()
            .filter(|v| v.user_id == user)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.viewed_at.cmp(&a.viewed_at));
        out.truncate(limit as usize);
        Ok(out)
    }
}

#[async_trait]
impl ResourceAnalyticsRepository for InMemoryRepository {
    async fn resource_analytics(
        &self,
        course: &CourseId,
    ) -> Result<Vec<ResourceStats>, StorageError> {
        let guard = self.lock()?;
        let mut stats: HashMap<ResourceId, ResourceStats> = HashMap::new();
        for view in guard.views.values().filter(|v| &v.course_id == course) {
            let entry = stats
                .entry(view.resource_id.clone())
                .or_insert_with(|| ResourceStats {
                    resource_id: view.resource_id.clone(),
                    total_views: 0,
                    unique_viewers: 0,
                    last_viewed: None,
                });
            entry.total_views += view.view_count;
            entry.unique_viewers += 1;
            entry.last_viewed = entry.last_viewed.max(Some(view.viewed_at));
        }
        let mut out: Vec<_> = stats.into_values().collect();
        out.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(out)
    }

    async fn popular_resources(&self, limit: u32) -> Result<Vec<PopularResource>, StorageError> {
        let guard = self.lock()?;
        let mut totals: HashMap<(CourseId, ResourceId), (u64, u64)> = HashMap::new();
        for view in guard.views.values() {
            let entry = totals
                .entry((view.course_id.clone(), view.resource_id.clone()))
                .or_default();
            entry.0 += view.view_count;
            entry.1 += 1;
        }

        let mut out = Vec::new();
        for ((course_id, resource_id), (total_views, unique_viewers)) in totals {
            let Some(resource) = guard
                .resources
                .get(&course_id)
                .and_then(|list| list.iter().find(|r| r.id == resource_id))
            else {
                continue;
            };
            out.push(PopularResource {
                course_id,
                resource_id,
                kind: resource.kind.clone(),
                title: resource.title.clone(),
                description: resource.description.clone(),
                icon: resource.icon.clone(),
                total_views,
                unique_viewers,
            });
        }
        out.sort_by(|a, b| {
            b.total_views
                .cmp(&a.total_views)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn search_resources(
        &self,
        query: &str,
        course: Option<&CourseId>,
        kind: Option<&str>,
    ) -> Result<Vec<SearchHit>, StorageError> {
        let needle = query.trim().to_lowercase();
        let guard = self.lock()?;
        let mut hits = Vec::new();
        for (course_id, resources) in &guard.resources {
            if course.is_some_and(|c| c != course_id) {
                continue;
            }
            for resource in resources {
                if kind.is_some_and(|k| k != resource.kind) {
                    continue;
                }
                let Some(rank) = match_rank(resource, &needle) else {
                    continue;
                };
                hits.push(SearchHit {
                    course_id: course_id.clone(),
                    resource_id: resource.id.clone(),
                    kind: resource.kind.clone(),
                    title: resource.title.clone(),
                    description: resource.description.clone(),
                    rank: Some(rank),
                });
            }
        }
        hits.sort_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        Ok(hits)
    }
}

fn match_rank(resource: &Resource, needle: &str) -> Option<f64> {
    if resource.title.to_lowercase().contains(needle) {
        return Some(1.0);
    }
    if resource
        .tags
        .iter()
        .any(|t| t.to_lowercase().contains(needle))
    {
        return Some(0.75);
    }
    resource
        .description
        .as_deref()
        .filter(|d| d.to_lowercase().contains(needle))
        .map(|_| 0.5)
}

// ─── Admin ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl AdminRepository for InMemoryRepository {
    async fn list_profiles(&self) -> Result<Vec<Profile>, StorageError> {
        let guard = self.lock()?;
        let mut out: Vec<_> = guard.profiles.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_all_modules(
        &self,
        scope: &ProgressScope,
    ) -> Result<Vec<ModuleRecord>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .modules
            .values()
            .filter(|r| &r.scope == scope)
            .cloned()
            .collect())
    }

    async fn list_all_attempts(
        &self,
        scope: &ProgressScope,
    ) -> Result<Vec<QuizAttemptRecord>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .attempts
            .iter()
            .filter(|a| &a.scope == scope)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnhub_core::time::fixed_now;

    fn new_attempt(user: UserId, number: u32) -> NewQuizAttempt {
        NewQuizAttempt {
            user_id: user,
            scope: ProgressScope::Global,
            module_id: ModuleId::new("1"),
            attempt_number: number,
            score: 3,
            total_questions: 5,
            passed: true,
            time_taken_secs: None,
            completed_at: fixed_now(),
        }
    }

    #[tokio::test]
    async fn module_rows_are_scoped() {
        let repo = InMemoryRepository::new();
        let user = UserId::random();
        let course = ProgressScope::course(CategorySlug::new("software-dev"), CourseId::new("rust"));
        repo.upsert_module(&ModuleRecord::started(
            user,
            ProgressScope::Global,
            ModuleId::new("1"),
            fixed_now(),
        ))
        .await
        .unwrap();

        assert_eq!(repo.list_modules(user, &ProgressScope::Global).await.unwrap().len(), 1);
        assert!(repo.list_modules(user, &course).await.unwrap().is_empty());
        assert!(
            repo.get_module(user, &course, &ModuleId::new("1"))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn answers_require_existing_attempt() {
        let repo = InMemoryRepository::new();
        let user = UserId::random();
        let attempt = repo.insert_attempt(&new_attempt(user, 1)).await.unwrap();

        let orphan = QuizAnswerRecord {
            attempt_id: AttemptId::random(),
            question_index: 0,
            selected_answer: 1,
            is_correct: true,
        };
        assert_eq!(
            repo.insert_answers(&[orphan]).await.unwrap_err(),
            StorageError::MissingReference
        );

        let answer = QuizAnswerRecord {
            attempt_id: attempt.id,
            ..orphan
        };
        repo.insert_answers(&[answer]).await.unwrap();
        assert_eq!(repo.list_answers(attempt.id).await.unwrap(), vec![answer]);
    }

    #[tokio::test]
    async fn attempt_numbers_are_unique_per_module() {
        let repo = InMemoryRepository::new();
        let user = UserId::random();
        repo.insert_attempt(&new_attempt(user, 1)).await.unwrap();
        assert_eq!(
            repo.insert_attempt(&new_attempt(user, 1)).await.unwrap_err(),
            StorageError::Duplicate
        );
        assert_eq!(
            repo.latest_attempt_number(user, &ProgressScope::Global, &ModuleId::new("1"))
                .await
                .unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn favorites_reject_duplicates() {
        let repo = InMemoryRepository::new();
        let record = FavoriteRecord {
            user_id: UserId::random(),
            course_id: CourseId::new("rust"),
            resource_id: ResourceId::new("terminology"),
            favorited_at: fixed_now(),
        };
        repo.insert_favorite(&record).await.unwrap();
        assert_eq!(
            repo.insert_favorite(&record).await.unwrap_err(),
            StorageError::Duplicate
        );
        repo.delete_favorite(record.user_id, &record.course_id, &record.resource_id)
            .await
            .unwrap();
        assert!(
            !repo
                .is_favorite(record.user_id, &record.course_id, &record.resource_id)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn avatar_urls_resolve_back_to_paths() {
        let repo = InMemoryRepository::new();
        let url = repo.upload("avatars/u-1.png", "image/png", &[1, 2]).await.unwrap();
        assert_eq!(repo.path_from_url(&url).as_deref(), Some("avatars/u-1.png"));
        repo.remove("avatars/u-1.png").await.unwrap();
        assert_eq!(repo.avatar_count().unwrap(), 0);
    }
}
