use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{CourseId, ResourceId};

/// Static resource metadata from a course's `resources.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Shape of `resources.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCatalog {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl ResourceCatalog {
    #[must_use]
    pub fn find(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.id == id)
    }
}

/// Aggregate view statistics for one resource (from the analytics RPC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub resource_id: ResourceId,
    pub total_views: u64,
    pub unique_viewers: u64,
    pub last_viewed: Option<DateTime<Utc>>,
}

/// Resource metadata merged with the signed-in user's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    #[serde(flatten)]
    pub resource: Resource,
    pub is_favorited: bool,
    pub view_count: u64,
    pub last_viewed: Option<DateTime<Utc>>,
}

impl ResourceEntry {
    #[must_use]
    pub fn anonymous(resource: Resource) -> Self {
        Self {
            resource,
            is_favorited: false,
            view_count: 0,
            last_viewed: None,
        }
    }
}

/// A row of the user's view history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentView {
    pub course_id: CourseId,
    pub resource_id: ResourceId,
    pub viewed_at: DateTime<Utc>,
    pub view_count: u64,
}

/// Favorite joined with its static metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteResource {
    pub course_id: CourseId,
    #[serde(flatten)]
    pub resource: Resource,
    pub favorited_at: DateTime<Utc>,
}

/// A recently viewed resource joined with its static metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentResource {
    pub course_id: CourseId,
    #[serde(flatten)]
    pub resource: Resource,
    pub viewed_at: DateTime<Utc>,
    pub view_count: u64,
}

/// Row returned by the popular-resources RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularResource {
    pub course_id: CourseId,
    pub resource_id: ResourceId,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    pub total_views: u64,
    pub unique_viewers: u64,
}

/// Row returned by the resource search RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub course_id: CourseId,
    pub resource_id: ResourceId,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rank: Option<f64>,
}

/// Map well-known content paths to the resource they represent.
#[must_use]
pub fn resource_id_from_path(path: &str) -> Option<ResourceId> {
    let id = match path {
        "resources/cheat-sheet.json" => "quick-reference",
        "resources/links.json" => "official-docs",
        "resources/glossary.json" => "terminology",
        _ => return None,
    };
    Some(ResourceId::new(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_paths_map_to_resource_ids() {
        assert_eq!(
            resource_id_from_path("resources/glossary.json"),
            Some(ResourceId::new("terminology"))
        );
        assert_eq!(resource_id_from_path("resources/unknown.json"), None);
    }

    #[test]
    fn catalog_parses_type_field() {
        let json = r#"{"resources":[{"id":"quick-reference","title":"Cheat sheet","type":"reference","featured":true}]}"#;
        let catalog: ResourceCatalog = serde_json::from_str(json).unwrap();
        let res = catalog.find(&ResourceId::new("quick-reference")).unwrap();
        assert_eq!(res.kind, "reference");
        assert!(res.featured);
        assert!(res.tags.is_empty());
    }
}
