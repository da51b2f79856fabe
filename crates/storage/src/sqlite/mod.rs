use std::sync::Arc;
use std::time::Duration;

use learnhub_core::model::{CourseId, ResourceCatalog, UserId};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use thiserror::Error;

use crate::repository::{Storage, StorageError};

mod account_repo;
mod mapping;
mod migrate;
mod progress_repo;
mod resource_repo;

/// Local backend with the same tables as the remote service, for development
/// and integration tests.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl SqliteRepository {
    /// Connect to `SQLite` using the given URL.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the connection cannot be established or if
    /// enforcing foreign key constraints fails during setup.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA journal_mode = WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 5000;")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;
        tracing::debug!(database_url, "sqlite pool connected");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if migration queries fail.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }

    /// Mirror a course's static resource metadata so analytics can join on it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be written.
    pub async fn register_resources(
        &self,
        course: &CourseId,
        catalog: &ResourceCatalog,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(mapping::db_err)?;
        for resource in &catalog.resources {
            sqlx::query(
                r"
                    INSERT INTO resources (course_id, resource_id, type, title, description, icon, tags)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(course_id, resource_id) DO UPDATE SET
                        type = excluded.type,
                        title = excluded.title,
                        description = excluded.description,
                        icon = excluded.icon,
                        tags = excluded.tags
                ",
            )
            .bind(course.as_str())
            .bind(resource.id.as_str())
            .bind(&resource.kind)
            .bind(&resource.title)
            .bind(resource.description.as_deref())
            .bind(resource.icon.as_deref())
            .bind(resource.tags.join(" "))
            .execute(&mut *tx)
            .await
            .map_err(mapping::db_err)?;
        }
        tx.commit().await.map_err(mapping::db_err)
    }

    /// Grant or revoke the admin flag on an existing profile.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the profile does not exist.
    pub async fn set_admin(&self, user: UserId, is_admin: bool) -> Result<(), StorageError> {
        let res = sqlx::query("UPDATE profiles SET is_admin = ?2 WHERE id = ?1")
            .bind(user.to_string())
            .bind(is_admin)
            .execute(&self.pool)
            .await
            .map_err(mapping::db_err)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

impl Storage {
    /// Build a `Storage` backed by `SQLite`.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if connection or migrations cannot be
    /// completed.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::connect(database_url).await?;
        repo.migrate().await?;
        Ok(Self::from_sqlite(repo))
    }

    #[must_use]
    pub fn from_sqlite(repo: SqliteRepository) -> Self {
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
