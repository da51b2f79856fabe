use chrono::{DateTime, Utc};
use learnhub_core::model::{
    AttemptId, CategorySlug, CourseId, ModuleId, ModuleStatus, Profile, ProgressScope, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::{ModuleRecord, QuizAttemptRecord, SectionRecord, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Translate driver errors, keeping constraint violations distinguishable.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Duplicate,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StorageError::MissingReference
        }
        _ => StorageError::Connection(e.to_string()),
    }
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn u64_from_i64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn i64_from_u64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

/// Scope as stored: empty strings for the global family.
pub(crate) fn scope_columns(scope: &ProgressScope) -> (&str, &str) {
    match scope {
        ProgressScope::Global => ("", ""),
        ProgressScope::Course { category, course } => (category.as_str(), course.as_str()),
    }
}

fn scope_from_row(row: &SqliteRow) -> Result<ProgressScope, StorageError> {
    let category: String = row.try_get("category_slug").map_err(ser)?;
    let course: String = row.try_get("course_slug").map_err(ser)?;
    if category.is_empty() && course.is_empty() {
        Ok(ProgressScope::Global)
    } else {
        Ok(ProgressScope::course(
            CategorySlug::new(category),
            CourseId::new(course),
        ))
    }
}

pub(crate) fn user_id_from_row(row: &SqliteRow, column: &str) -> Result<UserId, StorageError> {
    row.try_get::<String, _>(column)
        .map_err(ser)?
        .parse()
        .map_err(ser)
}

pub(crate) fn attempt_id_from_row(row: &SqliteRow, column: &str) -> Result<AttemptId, StorageError> {
    row.try_get::<String, _>(column)
        .map_err(ser)?
        .parse()
        .map_err(ser)
}

pub(crate) fn map_module_row(row: &SqliteRow) -> Result<ModuleRecord, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    Ok(ModuleRecord {
        user_id: user_id_from_row(row, "user_id")?,
        scope: scope_from_row(row)?,
        module_id: ModuleId::new(row.try_get::<String, _>("module_id").map_err(ser)?),
        status: ModuleStatus::parse(&status).map_err(ser)?,
        started_at: row.try_get("started_at").map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
        current_section: u32_from_i64(
            "current_section",
            row.try_get::<i64, _>("current_section").map_err(ser)?,
        )?,
    })
}

pub(crate) fn map_section_row(row: &SqliteRow) -> Result<SectionRecord, StorageError> {
    Ok(SectionRecord {
        user_id: user_id_from_row(row, "user_id")?,
        scope: scope_from_row(row)?,
        module_id: ModuleId::new(row.try_get::<String, _>("module_id").map_err(ser)?),
        section_index: u32_from_i64(
            "section_index",
            row.try_get::<i64, _>("section_index").map_err(ser)?,
        )?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
    })
}

pub(crate) fn map_attempt_row(row: &SqliteRow) -> Result<QuizAttemptRecord, StorageError> {
    let time_taken: Option<i64> = row.try_get("time_taken").map_err(ser)?;
    Ok(QuizAttemptRecord {
        id: attempt_id_from_row(row, "id")?,
        user_id: user_id_from_row(row, "user_id")?,
        scope: scope_from_row(row)?,
        module_id: ModuleId::new(row.try_get::<String, _>("module_id").map_err(ser)?),
        attempt_number: u32_from_i64(
            "attempt_number",
            row.try_get::<i64, _>("attempt_number").map_err(ser)?,
        )?,
        score: u32_from_i64("score", row.try_get::<i64, _>("score").map_err(ser)?)?,
        total_questions: u32_from_i64(
            "total_questions",
            row.try_get::<i64, _>("total_questions").map_err(ser)?,
        )?,
        passed: row.try_get("passed").map_err(ser)?,
        time_taken_secs: time_taken
            .map(|v| u32_from_i64("time_taken", v))
            .transpose()?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
        created_at: row.try_get("created_at").map_err(ser)?,
    })
}

pub(crate) fn map_profile_row(row: &SqliteRow) -> Result<Profile, StorageError> {
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(ser)?;
    Ok(Profile {
        id: user_id_from_row(row, "id")?,
        email: row.try_get("email").map_err(ser)?,
        full_name: row.try_get("full_name").map_err(ser)?,
        avatar_url: row.try_get("avatar_url").map_err(ser)?,
        is_admin: row.try_get("is_admin").map_err(ser)?,
        created_at,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}
