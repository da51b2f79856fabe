use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use storage::repository::StorageError;

use crate::Clock;
use crate::error::{AdminError, ProfileServiceError, ProgressError, ResourceError};

const ERROR_TTL_MS: i64 = 5_000;
const SUCCESS_TTL_MS: i64 = 3_000;
const INFO_TTL_MS: i64 = 4_000;

/// Errors that can be shown to a learner.
pub trait UserFacing {
    fn user_message(&self) -> String;
}

impl UserFacing for StorageError {
    fn user_message(&self) -> String {
        StorageError::user_message(self)
    }
}

impl UserFacing for ProgressError {
    fn user_message(&self) -> String {
        match self {
            ProgressError::Storage(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

impl UserFacing for ProfileServiceError {
    fn user_message(&self) -> String {
        match self {
            ProfileServiceError::Storage(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

impl UserFacing for ResourceError {
    fn user_message(&self) -> String {
        match self {
            ResourceError::Storage(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

impl UserFacing for AdminError {
    fn user_message(&self) -> String {
        match self {
            AdminError::Storage(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Error,
    Success,
    Info,
}

impl NotificationKind {
    fn ttl(self) -> Duration {
        match self {
            NotificationKind::Error => Duration::milliseconds(ERROR_TTL_MS),
            NotificationKind::Success => Duration::milliseconds(SUCCESS_TTL_MS),
            NotificationKind::Info => Duration::milliseconds(INFO_TTL_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub message: String,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inbox {
    next_id: u64,
    entries: Vec<Notification>,
}

/// Transient, auto-expiring messages for the learner.
///
/// One instance is shared by every service of a session; expiry is evaluated
/// against the caller-supplied time so tests can drive it with a fixed clock.
#[derive(Debug)]
pub struct Notifier {
    clock: Clock,
    inbox: Mutex<Inbox>,
}

impl Notifier {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            inbox: Mutex::new(Inbox::default()),
        }
    }

    fn inbox(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, kind: NotificationKind, message: String, context: Option<String>) -> u64 {
        let now = self.clock.now();
        let mut inbox = self.inbox();
        inbox.next_id += 1;
        let id = inbox.next_id;
        inbox.entries.push(Notification {
            id,
            kind,
            message,
            context,
            created_at: now,
            expires_at: now + kind.ttl(),
        });
        id
    }

    /// Record a failure, mapped to its user-facing message.
    pub fn report_error(&self, err: &dyn UserFacing, context: &str) -> u64 {
        let message = err.user_message();
        tracing::error!(context, detail = %message, "operation failed");
        self.push(NotificationKind::Error, message, Some(context.to_string()))
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.push(NotificationKind::Success, message.into(), None)
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.push(NotificationKind::Info, message.into(), None)
    }

    /// Remove one entry; unknown ids are ignored.
    pub fn dismiss(&self, id: u64) {
        self.inbox().entries.retain(|n| n.id != id);
    }

    pub fn clear(&self) {
        self.inbox().entries.clear();
    }

    /// Drop entries whose TTL has elapsed at `now`.
    pub fn prune_expired(&self, now: DateTime<Utc>) {
        self.inbox().entries.retain(|n| n.expires_at > now);
    }

    /// Entries still visible at `now`, oldest first.
    #[must_use]
    pub fn active(&self, now: DateTime<Utc>) -> Vec<Notification> {
        self.inbox()
            .entries
            .iter()
            .filter(|n| n.expires_at > now)
            .cloned()
            .collect()
    }

    /// Visible errors at `now`.
    #[must_use]
    pub fn errors(&self, now: DateTime<Utc>) -> Vec<Notification> {
        self.active(now)
            .into_iter()
            .filter(|n| n.kind == NotificationKind::Error)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnhub_core::time::fixed_now;

    #[test]
    fn entries_expire_by_kind() {
        let notifier = Notifier::new(Clock::fixed(fixed_now()));
        notifier.report_error(&StorageError::Duplicate, "save favorite");
        notifier.success("Saved");
        notifier.info("Heads up");

        let at = |ms| fixed_now() + Duration::milliseconds(ms);
        assert_eq!(notifier.active(at(2_999)).len(), 3);
        assert_eq!(notifier.active(at(3_000)).len(), 2);
        assert_eq!(notifier.active(at(4_000)).len(), 1);

        let errors = notifier.errors(at(4_500));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "This item already exists.");
        assert_eq!(errors[0].context.as_deref(), Some("save favorite"));
        assert!(notifier.active(at(5_000)).is_empty());
    }

    #[test]
    fn prune_and_dismiss_remove_entries() {
        let notifier = Notifier::new(Clock::fixed(fixed_now()));
        let keep = notifier.report_error(&ProgressError::NotAuthenticated, "load progress");
        let gone = notifier.success("Done");
        notifier.dismiss(gone);
        notifier.dismiss(999);
        assert_eq!(notifier.active(fixed_now()).len(), 1);

        notifier.prune_expired(fixed_now() + Duration::seconds(10));
        assert!(notifier.active(fixed_now()).is_empty());

        notifier.info("again");
        notifier.clear();
        assert!(notifier.active(fixed_now()).is_empty());
        assert_ne!(keep, gone);
    }
}
