use learnhub_core::model::{ModuleId, ProgressScope, UserId};
use serde_json::{Map, Value, json};

use super::eq;

pub(super) const PROFILES: &str = "profiles";
pub(super) const QUIZ_ANSWERS: &str = "quiz_answers";
pub(super) const FAVORITE_RESOURCES: &str = "user_favorite_resources_simple";
pub(super) const FAVORITE_CATEGORIES: &str = "user_favorite_categories_simple";
pub(super) const RESOURCE_VIEWS: &str = "user_resource_views_simple";

pub(super) const RPC_RESOURCE_ANALYTICS: &str = "get_resource_analytics";
pub(super) const RPC_POPULAR_RESOURCES: &str = "get_popular_resources";
pub(super) const RPC_SEARCH_RESOURCES: &str = "search_resources";

/// Table names and key columns for one progress family.
pub(super) struct ScopeTables {
    pub modules: &'static str,
    pub sections: &'static str,
    pub attempts: &'static str,
    pub module_conflict: &'static str,
    pub section_conflict: &'static str,
}

const GLOBAL: ScopeTables = ScopeTables {
    modules: "module_progress",
    sections: "section_progress",
    attempts: "quiz_attempts",
    module_conflict: "user_id,module_id",
    section_conflict: "user_id,module_id,section_index",
};

const COURSE: ScopeTables = ScopeTables {
    modules: "module_progress_json",
    sections: "section_progress_json",
    attempts: "quiz_attempts_json",
    module_conflict: "user_id,category_slug,course_slug,module_slug",
    section_conflict: "user_id,category_slug,course_slug,module_slug,section_index",
};

pub(super) fn tables_for(scope: &ProgressScope) -> &'static ScopeTables {
    match scope {
        ProgressScope::Global => &GLOBAL,
        ProgressScope::Course { .. } => &COURSE,
    }
}

/// Filters selecting a user's rows within a scope.
pub(super) fn scope_filters(user: Option<UserId>, scope: &ProgressScope) -> Vec<(String, String)> {
    let mut filters = Vec::new();
    if let Some(user) = user {
        filters.push(eq("user_id", user));
    }
    if let ProgressScope::Course { category, course } = scope {
        filters.push(eq("category_slug", category));
        filters.push(eq("course_slug", course));
    }
    filters
}

pub(super) fn module_filters(
    user: UserId,
    scope: &ProgressScope,
    module: &ModuleId,
) -> Vec<(String, String)> {
    let mut filters = scope_filters(Some(user), scope);
    filters.push(eq(module_column(scope), module));
    filters
}

pub(super) fn module_column(scope: &ProgressScope) -> &'static str {
    match scope {
        ProgressScope::Global => "module_id",
        ProgressScope::Course { .. } => "module_slug",
    }
}

/// Key columns identifying a module row, as a JSON object to extend.
pub(super) fn key_columns(user: UserId, scope: &ProgressScope, module: &ModuleId) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("user_id".into(), json!(user));
    match scope {
        ProgressScope::Global => {
            row.insert("module_id".into(), json!(module));
        }
        ProgressScope::Course { category, course } => {
            row.insert("category_slug".into(), json!(category));
            row.insert("course_slug".into(), json!(course));
            row.insert("module_slug".into(), json!(module));
        }
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnhub_core::model::{CategorySlug, CourseId};

    #[test]
    fn course_scope_uses_slug_columns() {
        let user = UserId::random();
        let scope = ProgressScope::course(CategorySlug::new("software-dev"), CourseId::new("rust"));
        let row = key_columns(user, &scope, &ModuleId::new("intro"));
        assert_eq!(row["module_slug"], json!("intro"));
        assert_eq!(row["course_slug"], json!("rust"));
        assert!(row.get("module_id").is_none());
        assert_eq!(tables_for(&scope).modules, "module_progress_json");

        let filters = module_filters(user, &scope, &ModuleId::new("intro"));
        assert!(filters.contains(&("module_slug".to_string(), "eq.intro".to_string())));
    }

    #[test]
    fn global_scope_uses_module_id() {
        let user = UserId::random();
        let row = key_columns(user, &ProgressScope::Global, &ModuleId::new("3"));
        assert_eq!(row["module_id"], json!("3"));
        assert_eq!(scope_filters(None, &ProgressScope::Global), Vec::new());
    }
}
