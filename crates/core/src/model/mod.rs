pub mod admin;
pub mod content;
mod ids;
pub mod profile;
pub mod progress;
pub mod quiz;
pub mod resource;
pub mod settings;

pub use ids::{AttemptId, CategorySlug, CourseId, ModuleId, ParseIdError, ResourceId, UserId};

pub use admin::{AdminAnalytics, AdminModuleRow, AdminQuizRow, UserProgressOverview, users_csv};
pub use content::{
    Category, CategoryIndex, Course, CourseIndex, LastSeenVersions, ModuleIndex, ModuleMeta,
    ModuleUpdate, MonthlyUpdate, SectionMeta, VersionManifest, is_newer_version,
};
pub use profile::{AvatarUpload, NewProfile, Profile, ProfileError, ProfileUpdate};
pub use progress::{ModuleStatus, ModuleStatusError, OverallProgress, ProgressScope, ProgressSnapshot};
pub use quiz::{PassThreshold, QuizAnswer, QuizError, QuizResult, QuizScore, rounded_percent};
pub use resource::{
    FavoriteResource, PopularResource, RecentResource, RecentView, Resource, ResourceCatalog,
    ResourceEntry, ResourceStats, SearchHit, resource_id_from_path,
};
pub use settings::{BackendSettings, BackendSettingsDraft, SettingsError};
