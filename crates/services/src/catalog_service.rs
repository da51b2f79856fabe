use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use learnhub_core::model::{
    Category, CategoryIndex, CategorySlug, Course, CourseId, CourseIndex, ModuleId, ModuleIndex,
    ModuleMeta,
};
use storage::content::{ContentSource, fetch_json};
use storage::repository::StorageError;

use crate::error::CatalogError;

/// Read-only access to the curated category, course and module documents.
pub struct CatalogService {
    content: Arc<dyn ContentSource>,
    courses: RwLock<HashMap<CategorySlug, Vec<Course>>>,
}

impl CatalogService {
    #[must_use]
    pub fn new(content: Arc<dyn ContentSource>) -> Self {
        Self {
            content,
            courses: RwLock::new(HashMap::new()),
        }
    }

    /// All categories ordered by `sort_order`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Storage` if `data/categories.json` cannot be read.
    pub async fn categories(&self) -> Result<Vec<Category>, CatalogError> {
        let index: CategoryIndex = fetch_json(self.content.as_ref(), "data/categories.json").await?;
        let mut categories = index.categories;
        categories.sort_by_key(|c| c.sort_order);
        Ok(categories)
    }

    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` for an unknown slug.
    pub async fn category(&self, slug: &CategorySlug) -> Result<Category, CatalogError> {
        self.categories()
            .await?
            .into_iter()
            .find(|c| &c.slug == slug)
            .ok_or_else(|| CatalogError::NotFound(format!("category {slug}")))
    }

    /// Courses of a category, fetched once per category.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the category has no course list.
    pub async fn courses(&self, category: &CategorySlug) -> Result<Vec<Course>, CatalogError> {
        if let Some(cached) = self
            .courses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(category)
        {
            return Ok(cached.clone());
        }

        let path = format!("data/{category}/courses.json");
        let index: CourseIndex = fetch_json(self.content.as_ref(), &path)
            .await
            .map_err(|err| not_found(err, || format!("courses for {category}")))?;
        tracing::debug!(category = %category, courses = index.courses.len(), "courses loaded");
        self.courses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(category.clone(), index.courses.clone());
        Ok(index.courses)
    }

    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the course has no module list.
    pub async fn modules(
        &self,
        category: &CategorySlug,
        course: &CourseId,
    ) -> Result<Vec<ModuleMeta>, CatalogError> {
        let path = format!("data/{category}/{course}/modules.json");
        let index: ModuleIndex = fetch_json(self.content.as_ref(), &path)
            .await
            .map_err(|err| not_found(err, || format!("modules for {category}/{course}")))?;
        Ok(index.modules)
    }

    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the module is not listed.
    pub async fn module_by_id(
        &self,
        category: &CategorySlug,
        course: &CourseId,
        module: &ModuleId,
    ) -> Result<ModuleMeta, CatalogError> {
        self.modules(category, course)
            .await?
            .into_iter()
            .find(|m| &m.id == module)
            .ok_or_else(|| CatalogError::NotFound(format!("module {module}")))
    }
}

fn not_found(err: StorageError, what: impl FnOnce() -> String) -> CatalogError {
    match err {
        StorageError::NotFound => CatalogError::NotFound(what()),
        other => CatalogError::Storage(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::content::StaticContentSource;

    fn source() -> StaticContentSource {
        StaticContentSource::new()
            .with(
                "data/categories.json",
                r#"{"categories":[
                    {"slug":"design","title":"Design","sortOrder":2},
                    {"slug":"software-dev","title":"Software","sortOrder":1}
                ]}"#,
            )
            .with(
                "data/software-dev/courses.json",
                r#"{"courses":[{"slug":"claude-code-training","title":"Claude Code"}]}"#,
            )
            .with(
                "data/software-dev/claude-code-training/modules.json",
                r#"{"modules":[{"id":1,"title":"Intro","sections":[{"title":"a"},{"title":"b"}]}]}"#,
            )
    }

    #[tokio::test]
    async fn categories_follow_sort_order() {
        let catalog = CatalogService::new(Arc::new(source()));
        let slugs: Vec<_> = catalog
            .categories()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.slug.to_string())
            .collect();
        assert_eq!(slugs, ["software-dev", "design"]);
    }

    #[tokio::test]
    async fn courses_are_cached_per_category() {
        let content = source();
        let catalog = CatalogService::new(Arc::new(content.clone()));
        let dev = CategorySlug::new("software-dev");
        assert_eq!(catalog.courses(&dev).await.unwrap().len(), 1);

        content.insert("data/software-dev/courses.json", r#"{"courses":[]}"#);
        assert_eq!(catalog.courses(&dev).await.unwrap().len(), 1);

        assert!(matches!(
            catalog.courses(&CategorySlug::new("design")).await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn modules_resolve_by_id() {
        let catalog = CatalogService::new(Arc::new(source()));
        let dev = CategorySlug::new("software-dev");
        let course = CourseId::new("claude-code-training");
        let intro = catalog
            .module_by_id(&dev, &course, &ModuleId::new("1"))
            .await
            .unwrap();
        assert_eq!(intro.sections.len(), 2);
        assert!(matches!(
            catalog.module_by_id(&dev, &course, &ModuleId::new("9")).await,
            Err(CatalogError::NotFound(_))
        ));
    }
}
