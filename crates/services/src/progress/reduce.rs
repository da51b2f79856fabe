use std::collections::{BTreeMap, BTreeSet};

use learnhub_core::model::{ModuleId, ProgressSnapshot, QuizResult, QuizScore};
use storage::repository::{ModuleRecord, QuizAttemptRecord, SectionRecord};

/// Fold the three progress tables into a fresh snapshot.
///
/// * every module row counts as started; `completed` rows also as completed
/// * cursor is the highest visited section, else the row's `current_section`
/// * the latest attempt per module wins, ordered by completion time, then
///   creation time, then attempt number
/// * the most recently updated module becomes the current one
#[must_use]
pub fn reduce_snapshot(
    modules: &[ModuleRecord],
    sections: &[SectionRecord],
    attempts: &[QuizAttemptRecord],
) -> ProgressSnapshot {
    let mut started = BTreeSet::new();
    let mut completed = BTreeSet::new();
    let mut cursor: BTreeMap<ModuleId, u32> = BTreeMap::new();
    let mut current: Option<&ModuleRecord> = None;

    for module in modules {
        started.insert(module.module_id.clone());
        if module.status.is_completed() {
            completed.insert(module.module_id.clone());
        }
        if current.is_none_or(|c| module.updated_at > c.updated_at) {
            current = Some(module);
        }
    }

    for section in sections {
        let entry = cursor.entry(section.module_id.clone()).or_insert(0);
        *entry = (*entry).max(section.section_index);
    }
    for module in modules {
        cursor
            .entry(module.module_id.clone())
            .or_insert(module.current_section);
    }

    let mut latest: BTreeMap<&ModuleId, &QuizAttemptRecord> = BTreeMap::new();
    for attempt in attempts {
        let newer = latest.get(&attempt.module_id).is_none_or(|seen| {
            (attempt.completed_at, attempt.created_at, attempt.attempt_number)
                > (seen.completed_at, seen.created_at, seen.attempt_number)
        });
        if newer {
            latest.insert(&attempt.module_id, attempt);
        }
    }

    let mut quiz_results = BTreeMap::new();
    for (module, attempt) in latest {
        match QuizScore::new(attempt.score, attempt.total_questions) {
            Ok(score) => {
                quiz_results.insert(
                    module.clone(),
                    QuizResult::new(score, attempt.passed, attempt.completed_at),
                );
            }
            Err(err) => {
                tracing::warn!(module = %module, error = %err, "skipping malformed quiz attempt");
            }
        }
    }

    ProgressSnapshot::from_parts(
        started,
        completed,
        quiz_results,
        cursor,
        current.map(|m| m.updated_at),
        current.map(|m| m.module_id.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use learnhub_core::model::{AttemptId, ModuleStatus, ProgressScope, UserId};
    use learnhub_core::time::fixed_now;

    fn m(id: &str) -> ModuleId {
        ModuleId::new(id)
    }

    fn module(user: UserId, id: &str, status: ModuleStatus, minutes: i64) -> ModuleRecord {
        let mut record =
            ModuleRecord::started(user, ProgressScope::Global, m(id), fixed_now());
        record.status = status;
        record.updated_at = fixed_now() + Duration::minutes(minutes);
        record
    }

    fn section(user: UserId, id: &str, index: u32) -> SectionRecord {
        SectionRecord {
            user_id: user,
            scope: ProgressScope::Global,
            module_id: m(id),
            section_index: index,
            completed_at: fixed_now(),
        }
    }

    fn attempt(user: UserId, id: &str, number: u32, score: u32, minutes: i64) -> QuizAttemptRecord {
        let at = fixed_now() + Duration::minutes(minutes);
        QuizAttemptRecord {
            id: AttemptId::random(),
            user_id: user,
            scope: ProgressScope::Global,
            module_id: m(id),
            attempt_number: number,
            score,
            total_questions: 5,
            passed: score >= 3,
            time_taken_secs: None,
            completed_at: at,
            created_at: at,
        }
    }

    #[test]
    fn reduces_rows_into_snapshot() {
        let user = UserId::random();
        let mut with_cursor = module(user, "c", ModuleStatus::InProgress, 1);
        with_cursor.current_section = 3;
        let modules = vec![
            module(user, "a", ModuleStatus::Completed, 5),
            module(user, "b", ModuleStatus::Started, 10),
            with_cursor,
        ];
        let sections = vec![
            section(user, "a", 2),
            section(user, "a", 4),
            section(user, "a", 1),
            section(user, "orphan", 2),
        ];
        let attempts = vec![
            attempt(user, "a", 1, 2, 1),
            attempt(user, "a", 2, 4, 3),
            attempt(user, "b", 1, 1, 2),
        ];

        let snap = reduce_snapshot(&modules, &sections, &attempts);
        assert_eq!(snap.started_module_ids().len(), 3);
        assert!(snap.is_completed(&m("a")));
        assert!(!snap.is_completed(&m("b")));
        assert_eq!(snap.cursor(&m("a")), 4);
        assert_eq!(snap.cursor(&m("b")), 0);
        assert_eq!(snap.cursor(&m("c")), 3);
        assert_eq!(snap.cursor(&m("orphan")), 2);
        assert_eq!(snap.quiz_result(&m("a")).unwrap().score, 4);
        assert!(!snap.quiz_result(&m("b")).unwrap().passed);
        assert_eq!(snap.current_module_id(), Some(&m("b")));
        assert_eq!(snap.last_accessed(), Some(fixed_now() + Duration::minutes(10)));
    }

    #[test]
    fn attempt_ties_fall_back_to_attempt_number() {
        let user = UserId::random();
        let attempts = vec![attempt(user, "a", 2, 5, 0), attempt(user, "a", 1, 1, 0)];
        let snap = reduce_snapshot(&[], &[], &attempts);
        assert_eq!(snap.quiz_result(&m("a")).unwrap().score, 5);
        assert!(snap.started_module_ids().is_empty());
        assert_eq!(snap.current_module_id(), None);
    }
}
