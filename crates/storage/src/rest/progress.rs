use async_trait::async_trait;
use learnhub_core::model::{AttemptId, ModuleId, ProgressScope, UserId};
use serde_json::{Value, json};

use super::rows::{AnswerRow, AttemptNumberRow, AttemptRow, ModuleRow, SectionRow, convert_all};
use super::tables::{
    QUIZ_ANSWERS, key_columns, module_filters, scope_filters, tables_for,
};
use super::{RestRepository, eq};
use crate::repository::{
    ModuleProgressRepository, ModuleRecord, NewQuizAttempt, QuizAnswerRecord, QuizAttemptRecord,
    QuizAttemptRepository, SectionProgressRepository, SectionRecord, StorageError,
};

#[async_trait]
impl ModuleProgressRepository for RestRepository {
    async fn list_modules(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<ModuleRecord>, StorageError> {
        let rows: Vec<ModuleRow> = self
            .select(tables_for(scope).modules, &scope_filters(Some(user), scope))
            .await?;
        convert_all(rows)
    }

    async fn get_module(
        &self,
        user: UserId,
        scope: &ProgressScope,
        module: &ModuleId,
    ) -> Result<ModuleRecord, StorageError> {
        let row: ModuleRow = self
            .select_one(tables_for(scope).modules, &module_filters(user, scope, module))
            .await?;
        ModuleRecord::try_from(row)
    }

    async fn upsert_module(&self, record: &ModuleRecord) -> Result<(), StorageError> {
        let tables = tables_for(&record.scope);
        let mut row = key_columns(record.user_id, &record.scope, &record.module_id);
        row.insert("status".into(), json!(record.status));
        row.insert("started_at".into(), json!(record.started_at));
        row.insert("completed_at".into(), json!(record.completed_at));
        row.insert("current_section".into(), json!(record.current_section));
        let touched = match record.scope {
            ProgressScope::Global => "updated_at",
            ProgressScope::Course { .. } => "last_accessed_at",
        };
        row.insert(touched.into(), json!(record.updated_at));

        self.upsert(tables.modules, tables.module_conflict, &Value::Object(row))
            .await
    }
}

#[async_trait]
impl SectionProgressRepository for RestRepository {
    async fn list_sections(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<SectionRecord>, StorageError> {
        let rows: Vec<SectionRow> = self
            .select(tables_for(scope).sections, &scope_filters(Some(user), scope))
            .await?;
        convert_all(rows)
    }

    async fn upsert_section(&self, record: &SectionRecord) -> Result<(), StorageError> {
        let tables = tables_for(&record.scope);
        let mut row = key_columns(record.user_id, &record.scope, &record.module_id);
        row.insert("section_index".into(), json!(record.section_index));
        row.insert("completed_at".into(), json!(record.completed_at));
        if matches!(record.scope, ProgressScope::Course { .. }) {
            row.insert("completed".into(), json!(true));
        }

        self.upsert(tables.sections, tables.section_conflict, &Value::Object(row))
            .await
    }
}

#[async_trait]
impl QuizAttemptRepository for RestRepository {
    async fn list_attempts(
        &self,
        user: UserId,
        scope: &ProgressScope,
    ) -> Result<Vec<QuizAttemptRecord>, StorageError> {
        let mut filters = scope_filters(Some(user), scope);
        filters.push(("order".into(), "created_at.desc".into()));
        let rows: Vec<AttemptRow> = self.select(tables_for(scope).attempts, &filters).await?;
        convert_all(rows)
    }

    async fn latest_attempt_number(
        &self,
        user: UserId,
        scope: &ProgressScope,
        module: &ModuleId,
    ) -> Result<Option<u32>, StorageError> {
        let mut filters = module_filters(user, scope, module);
        filters.push(("order".into(), "attempt_number.desc".into()));
        filters.push(("limit".into(), "1".into()));
        let rows: Vec<AttemptNumberRow> =
            self.select(tables_for(scope).attempts, &filters).await?;
        Ok(rows.into_iter().find_map(|r| r.attempt_number))
    }

    async fn insert_attempt(
        &self,
        attempt: &NewQuizAttempt,
    ) -> Result<QuizAttemptRecord, StorageError> {
        let mut row = key_columns(attempt.user_id, &attempt.scope, &attempt.module_id);
        row.insert("attempt_number".into(), json!(attempt.attempt_number));
        row.insert("score".into(), json!(attempt.score));
        row.insert("total_questions".into(), json!(attempt.total_questions));
        row.insert("passed".into(), json!(attempt.passed));
        row.insert("completed_at".into(), json!(attempt.completed_at));
        if let (ProgressScope::Course { .. }, Some(secs)) = (&attempt.scope, attempt.time_taken_secs)
        {
            row.insert("time_taken".into(), json!(secs));
        }

        let stored: AttemptRow = self
            .insert_returning(tables_for(&attempt.scope).attempts, &Value::Object(row))
            .await?;
        QuizAttemptRecord::try_from(stored)
    }

    async fn insert_answers(&self, answers: &[QuizAnswerRecord]) -> Result<(), StorageError> {
        if answers.is_empty() {
            return Ok(());
        }
        let body: Vec<Value> = answers
            .iter()
            .map(|a| {
                json!({
                    "attempt_id": a.attempt_id,
                    "question_index": a.question_index,
                    "selected_answer": a.selected_answer,
                    "is_correct": a.is_correct,
                })
            })
            .collect();
        self.insert(QUIZ_ANSWERS, &body).await
    }

    async fn list_answers(
        &self,
        attempt: AttemptId,
    ) -> Result<Vec<QuizAnswerRecord>, StorageError> {
        let filters = vec![
            eq("attempt_id", attempt),
            ("order".into(), "question_index.asc".into()),
        ];
        let rows: Vec<AnswerRow> = self.select(QUIZ_ANSWERS, &filters).await?;
        Ok(rows.into_iter().map(QuizAnswerRecord::from).collect())
    }
}
