#![forbid(unsafe_code)]

pub mod admin_service;
pub mod app_services;
pub mod auth;
pub mod catalog_service;
pub mod config;
pub mod error;
pub mod notifications;
pub mod profile_service;
pub mod progress;
pub mod resource_service;
pub mod theme_service;
pub mod update_service;

pub use learnhub_core::Clock;

pub use admin_service::{AdminService, UserProgressDetail};
pub use app_services::AppServices;
pub use auth::{AuthState, CallbackTokens, NotAuthenticated, SessionUser};
pub use catalog_service::CatalogService;
pub use config::LearnHubConfig;
pub use error::{
    AdminError, AppServicesError, CatalogError, ProfileServiceError, ProgressError, ResourceError,
};
pub use notifications::{Notification, NotificationKind, Notifier};
pub use profile_service::ProfileService;
pub use progress::{
    LocalProgressTracker, ProgressAggregator, ProgressConfig, ProgressRepos, QuizAttemptSaved,
    WriteOutcome,
};
pub use resource_service::{ResourceRepos, ResourceService};
pub use theme_service::{Theme, ThemeService};
pub use update_service::{UpdateService, UpdatesSinceLastVisit};
