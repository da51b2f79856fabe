//! Learner progress: the remote-backed aggregator for signed-in sessions and
//! the preference-backed tracker for guests.

mod aggregator;
mod inflight;
mod local;
mod reduce;

use std::sync::Arc;

use learnhub_core::model::{AttemptId, QuizResult};
use storage::repository::{
    ModuleProgressRepository, QuizAttemptRepository, SectionProgressRepository, Storage,
};

use crate::error::ProgressError;

pub use aggregator::{LoadState, ProgressAggregator, ProgressConfig};
pub use inflight::InFlight;
pub use local::LocalProgressTracker;
pub use reduce::reduce_snapshot;

/// Result of a remote-backed mutation.
///
/// Failures are reported to the session's `Notifier` before being returned, so
/// callers only need to inspect the outcome when they care about the value.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum WriteOutcome<T> {
    Committed(T),
    Failed(ProgressError),
}

impl<T> WriteOutcome<T> {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, WriteOutcome::Committed(_))
    }

    #[must_use]
    pub fn committed(self) -> Option<T> {
        match self {
            WriteOutcome::Committed(value) => Some(value),
            WriteOutcome::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&ProgressError> {
        match self {
            WriteOutcome::Committed(_) => None,
            WriteOutcome::Failed(err) => Some(err),
        }
    }

    /// # Errors
    ///
    /// Returns the recorded failure.
    pub fn into_result(self) -> Result<T, ProgressError> {
        match self {
            WriteOutcome::Committed(value) => Ok(value),
            WriteOutcome::Failed(err) => Err(err),
        }
    }
}

/// A stored quiz attempt and what followed from it.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizAttemptSaved {
    pub attempt_id: AttemptId,
    pub attempt_number: u32,
    pub result: QuizResult,
    /// False when the per-question answers could not be stored; the attempt
    /// itself still stands.
    pub answers_saved: bool,
    /// True when a passing attempt also marked the module completed.
    pub module_completed: bool,
}

/// The three progress table families the aggregator reads and writes.
#[derive(Clone)]
pub struct ProgressRepos {
    pub modules: Arc<dyn ModuleProgressRepository>,
    pub sections: Arc<dyn SectionProgressRepository>,
    pub quiz_attempts: Arc<dyn QuizAttemptRepository>,
}

impl ProgressRepos {
    #[must_use]
    pub fn from_storage(storage: &Storage) -> Self {
        Self {
            modules: Arc::clone(&storage.modules),
            sections: Arc::clone(&storage.sections),
            quiz_attempts: Arc::clone(&storage.quiz_attempts),
        }
    }
}
