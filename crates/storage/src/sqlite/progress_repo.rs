use learnhub_core::model::{AttemptId, ModuleId, ProgressScope, UserId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{
    attempt_id_from_row, db_err, map_attempt_row, map_module_row, map_section_row, scope_columns,
    ser, u32_from_i64,
};
use crate::repository::{
    ModuleProgressRepository, ModuleRecord, NewQuizAttempt, QuizAnswerRecord, QuizAttemptRecord,
    QuizAttemptRepository, SectionProgressRepository, SectionRecord, StorageError,
};

#[async_trait::async_trait]
impl ModuleProgressRepository for SqliteRepository {
    async fn list_modules(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<ModuleRecord>, StorageError> {
        let (category, course) = scope_columns(scope);
        let rows = sqlx::query(
            r"
                SELECT
                    user_id, category_slug, course_slug, module_id, status,
                    started_at, completed_at, updated_at, current_section
                FROM module_progress
                WHERE user_id = ?1 AND category_slug = ?2 AND course_slug = ?3
                ORDER BY module_id ASC
            ",
        )
        .bind(user.to_string())
        .bind(category)
        .bind(course)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_module_row).collect()
    }

    async fn get_module(
        &self,
        user: UserId,
        scope: &ProgressScope,
        module: &ModuleId,
    ) -> Result<ModuleRecord, StorageError> {
        let (category, course) = scope_columns(scope);
        let row = sqlx::query(
            r"
                SELECT
                    user_id, category_slug, course_slug, module_id, status,
                    started_at, completed_at, updated_at, current_section
                FROM module_progress
                WHERE user_id = ?1 AND category_slug = ?2 AND course_slug = ?3 AND module_id = ?4
            ",
        )
        .bind(user.to_string())
        .bind(category)
        .bind(course)
        .bind(module.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StorageError::NotFound)?;

        map_module_row(&row)
    }

    async fn upsert_module(&self, record: &ModuleRecord) -> Result<(), StorageError> {
        let (category, course) = scope_columns(&record.scope);
        sqlx::query(
            r"
                INSERT INTO module_progress (
                    user_id, category_slug, course_slug, module_id, status,
                    started_at, completed_at, updated_at, current_section
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(user_id, category_slug, course_slug, module_id) DO UPDATE SET
                    status = excluded.status,
                    started_at = excluded.started_at,
                    completed_at = excluded.completed_at,
                    updated_at = excluded.updated_at,
                    current_section = excluded.current_section
            ",
        )
        .bind(record.user_id.to_string())
        .bind(category)
        .bind(course)
        .bind(record.module_id.as_str())
        .bind(record.status.as_str())
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.updated_at)
        .bind(i64::from(record.current_section))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SectionProgressRepository for SqliteRepository {
    async fn list_sections(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<SectionRecord>, StorageError> {
        let (category, course) = scope_columns(scope);
        let rows = sqlx::query(
            r"
                SELECT user_id, category_slug, course_slug, module_id, section_index, completed_at
                FROM section_progress
                WHERE user_id = ?1 AND category_slug = ?2 AND course_slug = ?3
                ORDER BY module_id ASC, section_index ASC
            ",
        )
        .bind(user.to_string())
        .bind(category)
        .bind(course)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_section_row).collect()
    }

    async fn upsert_section(&self, record: &SectionRecord) -> Result<(), StorageError> {
        let (category, course) = scope_columns(&record.scope);
        sqlx::query(
            r"
                INSERT INTO section_progress (
                    user_id, category_slug, course_slug, module_id, section_index, completed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(user_id, category_slug, course_slug, module_id, section_index)
                DO UPDATE SET completed_at = excluded.completed_at
            ",
        )
        .bind(record.user_id.to_string())
        .bind(category)
        .bind(course)
        .bind(record.module_id.as_str())
        .bind(i64::from(record.section_index))
        .bind(record.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

const ATTEMPT_COLUMNS: &str = r"
    id, user_id, category_slug, course_slug, module_id, attempt_number,
    score, total_questions, passed, time_taken, completed_at, created_at
";

#[async_trait::async_trait]
impl QuizAttemptRepository for SqliteRepository {
    async fn list_attempts(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<QuizAttemptRecord>, StorageError> {
        let (category, course) = scope_columns(scope);
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts
             WHERE user_id = ?1 AND category_slug = ?2 AND course_slug = ?3
             ORDER BY created_at DESC, attempt_number DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user.to_string())
            .bind(category)
            .bind(course)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(map_attempt_row).collect()
    }

    async fn latest_attempt_number(
        &self,
        user: UserId,
        scope: &ProgressScope,
        module: &ModuleId,
    ) -> Result<Option<u32>, StorageError> {
        let (category, course) = scope_columns(scope);
        let row = sqlx::query(
            r"
                SELECT MAX(attempt_number) AS latest
                FROM quiz_attempts
                WHERE user_id = ?1 AND category_slug = ?2 AND course_slug = ?3 AND module_id = ?4
            ",
        )
        .bind(user.to_string())
        .bind(category)
        .bind(course)
        .bind(module.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.try_get::<Option<i64>, _>("latest")
            .map_err(ser)?
            .map(|v| u32_from_i64("attempt_number", v))
            .transpose()
    }

    async fn insert_attempt(
        &self,
        attempt: &NewQuizAttempt,
    ) -> Result<QuizAttemptRecord, StorageError> {
        let (category, course) = scope_columns(&attempt.scope);
        let id = AttemptId::random();
        let created_at = attempt.completed_at;
        sqlx::query(
            r"
                INSERT INTO quiz_attempts (
                    id, user_id, category_slug, course_slug, module_id, attempt_number,
                    score, total_questions, passed, time_taken, completed_at, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ",
        )
        .bind(id.to_string())
        .bind(attempt.user_id.to_string())
        .bind(category)
        .bind(course)
        .bind(attempt.module_id.as_str())
        .bind(i64::from(attempt.attempt_number))
        .bind(i64::from(attempt.score))
        .bind(i64::from(attempt.total_questions))
        .bind(attempt.passed)
        .bind(attempt.time_taken_secs.map(i64::from))
        .bind(attempt.completed_at)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(attempt.clone().into_record(id, created_at))
    }

    async fn insert_answers(&self, answers: &[QuizAnswerRecord]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for answer in answers {
            sqlx::query(
                r"
                    INSERT INTO quiz_answers (attempt_id, question_index, selected_answer, is_correct)
                    VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(answer.attempt_id.to_string())
            .bind(i64::from(answer.question_index))
            .bind(i64::from(answer.selected_answer))
            .bind(answer.is_correct)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)
    }

    async fn list_answers(
        &self,
        attempt: AttemptId,
    ) -> Result<Vec<QuizAnswerRecord>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT attempt_id, question_index, selected_answer, is_correct
                FROM quiz_answers
                WHERE attempt_id = ?1
                ORDER BY question_index ASC
            ",
        )
        .bind(attempt.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(QuizAnswerRecord {
                attempt_id: attempt_id_from_row(&row, "attempt_id")?,
                question_index: u32_from_i64(
                    "question_index",
                    row.try_get::<i64, _>("question_index").map_err(ser)?,
                )?,
                selected_answer: u32_from_i64(
                    "selected_answer",
                    row.try_get::<i64, _>("selected_answer").map_err(ser)?,
                )?,
                is_correct: row.try_get("is_correct").map_err(ser)?,
            });
        }
        Ok(out)
    }
}
