use chrono::{DateTime, Utc};
use learnhub_core::model::{NewProfile, Profile, ProfileUpdate, ProgressScope, UserId};

use super::SqliteRepository;
use super::mapping::{db_err, map_attempt_row, map_module_row, map_profile_row, scope_columns};
use crate::repository::{
    AdminRepository, AvatarStore, ModuleRecord, ProfileRepository, QuizAttemptRecord,
    StorageError,
};

const LOCAL_AVATAR_PREFIX: &str = "sqlite://avatars/";

const PROFILE_COLUMNS: &str = "id, email, full_name, avatar_url, is_admin, created_at, updated_at";

#[async_trait::async_trait]
impl ProfileRepository for SqliteRepository {
    async fn get_profile(&self, user: UserId) -> Result<Profile, StorageError> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(user.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;

        map_profile_row(&row)
    }

    async fn insert_profile(
        &self,
        profile: &NewProfile,
        at: DateTime<Utc>,
    ) -> Result<Profile, StorageError> {
        sqlx::query(
            r"
                INSERT INTO profiles (id, email, full_name, avatar_url, is_admin, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(profile.id.to_string())
        .bind(&profile.email)
        .bind(&profile.full_name)
        .bind(profile.avatar_url.as_deref())
        .bind(profile.is_admin)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(profile.clone().into_profile(at))
    }

    async fn update_profile(
        &self,
        user: UserId,
        update: &ProfileUpdate,
        at: DateTime<Utc>,
    ) -> Result<Profile, StorageError> {
        let mut profile = self.get_profile(user).await?;
        update.apply_to(&mut profile, at);

        sqlx::query(
            r"
                UPDATE profiles
                SET full_name = ?2, avatar_url = ?3, updated_at = ?4
                WHERE id = ?1
            ",
        )
        .bind(user.to_string())
        .bind(profile.full_name.as_deref())
        .bind(profile.avatar_url.as_deref())
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(profile)
    }
}

#[async_trait::async_trait]
impl AvatarStore for SqliteRepository {
    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        sqlx::query(
            r"
                INSERT INTO avatars (path, content_type, bytes, created_at)
                VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(path)
        .bind(content_type)
        .bind(bytes)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(format!("{LOCAL_AVATAR_PREFIX}{path}"))
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let res = sqlx::query("DELETE FROM avatars WHERE path = ?1")
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    fn path_from_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(LOCAL_AVATAR_PREFIX).map(str::to_string)
    }
}

#[async_trait::async_trait]
impl AdminRepository for SqliteRepository {
    async fn list_profiles(&self) -> Result<Vec<Profile>, StorageError> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY created_at DESC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(map_profile_row).collect()
    }

    async fn list_all_modules(
        &self,
        scope: &ProgressScope,
    ) -> Result<Vec<ModuleRecord>, StorageError> {
        let (category, course) = scope_columns(scope);
        let rows = sqlx::query(
            r"
                SELECT
                    user_id, category_slug, course_slug, module_id, status,
                    started_at, completed_at, updated_at, current_section
                FROM module_progress
                WHERE category_slug = ?1 AND course_slug = ?2
            ",
        )
        .bind(category)
        .bind(course)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_module_row).collect()
    }

    async fn list_all_attempts(
        &self,
        scope: &ProgressScope,
    ) -> Result<Vec<QuizAttemptRecord>, StorageError> {
        let (category, course) = scope_columns(scope);
        let rows = sqlx::query(
            r"
                SELECT
                    id, user_id, category_slug, course_slug, module_id, attempt_number,
                    score, total_questions, passed, time_taken, completed_at, created_at
                FROM quiz_attempts
                WHERE category_slug = ?1 AND course_slug = ?2
                ORDER BY completed_at DESC
            ",
        )
        .bind(category)
        .bind(course)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_attempt_row).collect()
    }
}
