use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Both progress families share one set of tables; the global family stores
/// empty `category_slug`/`course_slug` columns.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS profiles (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL,
                    full_name TEXT,
                    avatar_url TEXT,
                    is_admin INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS module_progress (
                    user_id TEXT NOT NULL,
                    category_slug TEXT NOT NULL DEFAULT '',
                    course_slug TEXT NOT NULL DEFAULT '',
                    module_id TEXT NOT NULL,
                    status TEXT NOT NULL
                        CHECK (status IN ('not_started', 'started', 'in_progress', 'completed')),
                    started_at TEXT,
                    completed_at TEXT,
                    updated_at TEXT NOT NULL,
                    current_section INTEGER NOT NULL DEFAULT 0 CHECK (current_section >= 0),
                    PRIMARY KEY (user_id, category_slug, course_slug, module_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS section_progress (
                    user_id TEXT NOT NULL,
                    category_slug TEXT NOT NULL DEFAULT '',
                    course_slug TEXT NOT NULL DEFAULT '',
                    module_id TEXT NOT NULL,
                    section_index INTEGER NOT NULL CHECK (section_index >= 0),
                    completed_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, category_slug, course_slug, module_id, section_index)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS quiz_attempts (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    category_slug TEXT NOT NULL DEFAULT '',
                    course_slug TEXT NOT NULL DEFAULT '',
                    module_id TEXT NOT NULL,
                    attempt_number INTEGER NOT NULL CHECK (attempt_number >= 1),
                    score INTEGER NOT NULL CHECK (score >= 0),
                    total_questions INTEGER NOT NULL CHECK (total_questions > 0),
                    passed INTEGER NOT NULL,
                    time_taken INTEGER,
                    completed_at TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, category_slug, course_slug, module_id, attempt_number)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS quiz_answers (
                    attempt_id TEXT NOT NULL,
                    question_index INTEGER NOT NULL CHECK (question_index >= 0),
                    selected_answer INTEGER NOT NULL,
                    is_correct INTEGER NOT NULL,
                    PRIMARY KEY (attempt_id, question_index),
                    FOREIGN KEY (attempt_id) REFERENCES quiz_attempts(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS avatars (
                    path TEXT PRIMARY KEY,
                    content_type TEXT NOT NULL,
                    bytes BLOB NOT NULL,
                    created_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS resources (
                    course_id TEXT NOT NULL,
                    resource_id TEXT NOT NULL,
                    type TEXT NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT,
                    icon TEXT,
                    tags TEXT NOT NULL DEFAULT '',
                    PRIMARY KEY (course_id, resource_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS favorite_resources (
                    user_id TEXT NOT NULL,
                    course_id TEXT NOT NULL,
                    resource_id TEXT NOT NULL,
                    favorited_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, course_id, resource_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS favorite_categories (
                    user_id TEXT NOT NULL,
                    category_slug TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, category_slug)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS resource_views (
                    user_id TEXT NOT NULL,
                    course_id TEXT NOT NULL,
                    resource_id TEXT NOT NULL,
                    view_count INTEGER NOT NULL CHECK (view_count >= 0),
                    viewed_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, course_id, resource_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_quiz_attempts_user_module
                    ON quiz_attempts (user_id, category_slug, course_slug, module_id, attempt_number);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_resource_views_user_viewed_at
                    ON resource_views (user_id, viewed_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
