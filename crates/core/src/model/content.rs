//! Static, externally curated content documents (`data/**.json`).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{CategorySlug, CourseId, ModuleId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub slug: CategorySlug,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
}

/// Shape of `data/categories.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CategoryIndex {
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub slug: CourseId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub module_count: Option<u32>,
}

/// Shape of `data/{category}/courses.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CourseIndex {
    #[serde(default)]
    pub courses: Vec<Course>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionMeta {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMeta {
    pub id: ModuleId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub sections: Vec<SectionMeta>,
}

/// Shape of `data/{category}/{course}/modules.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModuleIndex {
    #[serde(default)]
    pub modules: Vec<ModuleMeta>,
}

//
// ─── VERSIONING ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleUpdate {
    pub version: String,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyUpdate {
    pub id: ModuleId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Shape of `data/version.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    pub content_version: String,
    #[serde(default)]
    pub module_updates: BTreeMap<ModuleId, ModuleUpdate>,
    #[serde(default)]
    pub monthly_updates: Vec<MonthlyUpdate>,
}

impl VersionManifest {
    #[must_use]
    pub fn monthly_update(&self, id: &ModuleId) -> Option<&MonthlyUpdate> {
        self.monthly_updates.iter().find(|u| &u.id == id)
    }
}

/// What the user has already seen, cached in the preference store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSeenVersions {
    #[serde(default)]
    pub content_version: Option<String>,
    #[serde(default)]
    pub module_versions: BTreeMap<ModuleId, String>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

/// Compare the first three dot-separated numeric components.
///
/// Missing `last_seen` counts as older. Unparseable components count as 0.
#[must_use]
pub fn is_newer_version(current: &str, last_seen: Option<&str>) -> bool {
    let Some(last_seen) = last_seen else {
        return true;
    };
    let current = version_parts(current);
    let seen = version_parts(last_seen);
    current.cmp(&seen) == Ordering::Greater
}

fn version_parts(version: &str) -> [u64; 3] {
    let mut parts = [0_u64; 3];
    for (slot, raw) in parts.iter_mut().zip(version.split('.')) {
        *slot = raw.trim().parse().unwrap_or(0);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_version_compares_numerically() {
        assert!(is_newer_version("1.10.0", Some("1.9.9")));
        assert!(!is_newer_version("1.2.0", Some("1.2.0")));
        assert!(!is_newer_version("1.2.0", Some("1.3")));
        assert!(is_newer_version("0.0.1", None));
        assert!(is_newer_version("2", Some("1.9")));
    }

    #[test]
    fn manifest_parses_numeric_module_keys() {
        let json = r#"{
            "contentVersion": "1.4.0",
            "moduleUpdates": {"3": {"version": "1.1", "changes": ["typo"]}},
            "monthlyUpdates": [{"id": "2024-06", "features": ["hooks"]}]
        }"#;
        let manifest: VersionManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.module_updates[&ModuleId::new("3")].version, "1.1");
        assert!(manifest.monthly_update(&ModuleId::new("2024-06")).is_some());
    }

    #[test]
    fn modules_json_accepts_numeric_ids() {
        let json = r#"{"modules":[{"id":1,"title":"Intro","sections":[{"title":"Welcome"}]}]}"#;
        let index: ModuleIndex = serde_json::from_str(json).unwrap();
        assert_eq!(index.modules[0].id, ModuleId::new("1"));
        assert_eq!(index.modules[0].sections.len(), 1);
    }
}
