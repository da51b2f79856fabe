use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use learnhub_core::model::{
    Category, CategorySlug, CourseId, FavoriteResource, PopularResource, RecentResource,
    ResourceCatalog, ResourceEntry, ResourceId, ResourceStats, SearchHit, UserId,
    resource_id_from_path,
};
use serde_json::Value;
use storage::content::{ContentSource, fetch_json};
use storage::repository::{
    CategoryFavoriteRecord, FavoriteRecord, FavoriteRepository, ResourceAnalyticsRepository,
    ResourceViewRecord, ResourceViewRepository, StorageError,
};

use crate::Clock;
use crate::auth::AuthState;
use crate::error::ResourceError;
use crate::notifications::Notifier;

/// Category whose courses carry resource catalogs.
const RESOURCE_CATEGORY: &str = "software-dev";

fn course_path(course: &CourseId, file: &str) -> String {
    format!(
        "data/{RESOURCE_CATEGORY}/{course}/{}",
        file.trim_start_matches('/')
    )
}

/// Course resources, favorites and view history.
///
/// Static metadata comes from each course's `resources.json`; per-user state
/// (favorites, views) and aggregate analytics come from the backend and are
/// merged in when someone is signed in.
pub struct ResourceService {
    auth: Arc<AuthState>,
    content: Arc<dyn ContentSource>,
    favorites: Arc<dyn FavoriteRepository>,
    views: Arc<dyn ResourceViewRepository>,
    analytics: Arc<dyn ResourceAnalyticsRepository>,
    notifier: Arc<Notifier>,
    clock: Clock,
    catalogs: RwLock<HashMap<CourseId, ResourceCatalog>>,
    content_cache: RwLock<HashMap<ResourceId, Value>>,
    favorite_categories: RwLock<BTreeSet<CategorySlug>>,
}

/// Backend handles used by [`ResourceService`].
#[derive(Clone)]
pub struct ResourceRepos {
    pub favorites: Arc<dyn FavoriteRepository>,
    pub views: Arc<dyn ResourceViewRepository>,
    pub analytics: Arc<dyn ResourceAnalyticsRepository>,
}

impl ResourceService {
    #[must_use]
    pub fn new(
        clock: Clock,
        auth: Arc<AuthState>,
        content: Arc<dyn ContentSource>,
        repos: ResourceRepos,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            auth,
            content,
            favorites: repos.favorites,
            views: repos.views,
            analytics: repos.analytics,
            notifier,
            clock,
            catalogs: RwLock::new(HashMap::new()),
            content_cache: RwLock::new(HashMap::new()),
            favorite_categories: RwLock::new(BTreeSet::new()),
        }
    }

    //
    // ─── COURSE RESOURCES ──────────────────────────────────────────────────────
    //

    /// Static resource metadata for a course, fetched once per course.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::NotFound` if the course has no catalog and
    /// `ResourceError::Storage` if it cannot be fetched or decoded.
    pub async fn course_catalog(&self, course: &CourseId) -> Result<ResourceCatalog, ResourceError> {
        if let Some(cached) = self
            .catalogs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(course)
        {
            return Ok(cached.clone());
        }
        let catalog: ResourceCatalog =
            fetch_json(self.content.as_ref(), &course_path(course, "resources.json"))
                .await
                .map_err(not_found_as_resource)?;
        self.catalogs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(course.clone(), catalog.clone());
        Ok(catalog)
    }

    /// Resources of a course, merged with the signed-in user's favorites and
    /// the course's view analytics. Either lookup failing is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an error only when the static catalog cannot be loaded.
    pub async fn load_course_resources(
        &self,
        course: &CourseId,
    ) -> Result<Vec<ResourceEntry>, ResourceError> {
        let catalog = self.course_catalog(course).await?;
        let Some(user) = self.auth.current_user() else {
            return Ok(catalog.resources.into_iter().map(ResourceEntry::anonymous).collect());
        };

        let (favorites, analytics) = tokio::join!(
            self.course_favorites(user.id, course),
            self.analytics.resource_analytics(course),
        );
        let analytics: HashMap<ResourceId, ResourceStats> = analytics
            .unwrap_or_else(|err| {
                tracing::warn!(course = %course, error = %err, "resource analytics unavailable");
                Vec::new()
            })
            .into_iter()
            .map(|stats| (stats.resource_id.clone(), stats))
            .collect();

        Ok(catalog
            .resources
            .into_iter()
            .map(|resource| {
                let stats = analytics.get(&resource.id);
                ResourceEntry {
                    is_favorited: favorites.contains(&resource.id),
                    view_count: stats.map_or(0, |s| s.total_views),
                    last_viewed: stats.and_then(|s| s.last_viewed),
                    resource,
                }
            })
            .collect())
    }

    async fn course_favorites(&self, user: UserId, course: &CourseId) -> BTreeSet<ResourceId> {
        match self.favorites.list_favorites(user).await {
            Ok(rows) => rows
                .into_iter()
                .filter(|row| &row.course_id == course)
                .map(|row| row.resource_id)
                .collect(),
            Err(err) => {
                tracing::warn!(course = %course, error = %err, "favorites unavailable");
                BTreeSet::new()
            }
        }
    }

    /// Fetch a resource document, cached by resource id. The first fetch of a
    /// well-known document also counts as a view for signed-in users.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::NotFound` if the document does not exist and
    /// `ResourceError::Storage` if it cannot be fetched or decoded.
    pub async fn load_resource_content(
        &self,
        course: &CourseId,
        path: &str,
        resource: &ResourceId,
    ) -> Result<Value, ResourceError> {
        if let Some(cached) = self
            .content_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
        {
            return Ok(cached.clone());
        }

        let document: Value = fetch_json(self.content.as_ref(), &course_path(course, path))
            .await
            .map_err(not_found_as_resource)?;
        self.content_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.clone(), document.clone());

        if self.auth.is_authenticated() {
            if let Some(tracked) = resource_id_from_path(path) {
                if let Err(err) = self.track_view(course, &tracked).await {
                    tracing::warn!(course = %course, resource = %tracked, error = %err, "view not tracked");
                }
            }
        }
        Ok(document)
    }

    /// Drop cached catalogs and documents so the next read refetches them.
    pub fn refresh(&self) {
        self.catalogs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.content_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    //
    // ─── FAVORITES & VIEWS ─────────────────────────────────────────────────────
    //

    /// Flip the favorite flag and return the new state.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::NotAuthenticated` when nobody is signed in and
    /// `ResourceError::Storage` if the backend fails.
    pub async fn toggle_favorite(
        &self,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<bool, ResourceError> {
        let user = self.auth.require_user()?;
        let result = self.set_favorite(user.id, course, resource).await;
        if let Err(err) = &result {
            self.notifier.report_error(err, "Failed to update favorites");
        }
        result
    }

    async fn set_favorite(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<bool, ResourceError> {
        let current = match self.favorites.is_favorite(user, course, resource).await {
            Ok(flag) => flag,
            Err(StorageError::NotFound) => false,
            Err(err) => return Err(err.into()),
        };

        if current {
            self.favorites.delete_favorite(user, course, resource).await?;
        } else {
            let record = FavoriteRecord {
                user_id: user,
                course_id: course.clone(),
                resource_id: resource.clone(),
                favorited_at: self.clock.now(),
            };
            match self.favorites.insert_favorite(&record).await {
                Ok(()) | Err(StorageError::Duplicate) => {}
                Err(err) => return Err(err.into()),
            }
        }
        tracing::debug!(user = %user, course = %course, resource = %resource, favorited = !current, "favorite toggled");
        Ok(!current)
    }

    /// Count a view of `resource` and return the user's new total.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::NotAuthenticated` when nobody is signed in and
    /// `ResourceError::Storage` if the backend fails.
    pub async fn track_view(
        &self,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<u64, ResourceError> {
        let user = self.auth.require_user()?;
        let view_count = match self.views.get_view(user.id, course, resource).await {
            Ok(existing) => existing.view_count + 1,
            Err(StorageError::NotFound) => 1,
            Err(err) => return Err(err.into()),
        };
        self.views
            .upsert_view(&ResourceViewRecord {
                user_id: user.id,
                course_id: course.clone(),
                resource_id: resource.clone(),
                view_count,
                viewed_at: self.clock.now(),
            })
            .await?;
        Ok(view_count)
    }

    /// Most recent views joined with their metadata. Views of courses whose
    /// catalog cannot be loaded, or of resources no longer listed, are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Storage` if the view history cannot be read.
    pub async fn recently_viewed(&self, limit: u32) -> Result<Vec<RecentResource>, ResourceError> {
        let Some(user) = self.auth.current_user() else {
            return Ok(Vec::new());
        };
        let views = self.views.recent_views(user.id, limit).await?;

        let mut out = Vec::with_capacity(views.len());
        for view in views {
            let Some(catalog) = self.joinable_catalog(&view.course_id).await else {
                continue;
            };
            if let Some(resource) = catalog.find(&view.resource_id) {
                out.push(RecentResource {
                    course_id: view.course_id,
                    resource: resource.clone(),
                    viewed_at: view.viewed_at,
                    view_count: view.view_count,
                });
            }
        }
        Ok(out)
    }

    /// Every favorite resource, newest first, joined with its metadata.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Storage` if the favorites cannot be read.
    pub async fn favorite_resources(&self) -> Result<Vec<FavoriteResource>, ResourceError> {
        let Some(user) = self.auth.current_user() else {
            return Ok(Vec::new());
        };
        let favorites = self.favorites.list_favorites(user.id).await?;

        let mut out = Vec::with_capacity(favorites.len());
        for favorite in favorites {
            let Some(catalog) = self.joinable_catalog(&favorite.course_id).await else {
                continue;
            };
            if let Some(resource) = catalog.find(&favorite.resource_id) {
                out.push(FavoriteResource {
                    course_id: favorite.course_id,
                    resource: resource.clone(),
                    favorited_at: favorite.favorited_at,
                });
            }
        }
        Ok(out)
    }

    async fn joinable_catalog(&self, course: &CourseId) -> Option<ResourceCatalog> {
        match self.course_catalog(course).await {
            Ok(catalog) => Some(catalog),
            Err(err) => {
                tracing::warn!(course = %course, error = %err, "skipping course without resources");
                None
            }
        }
    }

    //
    // ─── ANALYTICS ─────────────────────────────────────────────────────────────
    //

    /// # Errors
    ///
    /// Returns `ResourceError::Storage` if the query fails.
    pub async fn popular_resources(&self, limit: u32) -> Result<Vec<PopularResource>, ResourceError> {
        Ok(self.analytics.popular_resources(limit).await?)
    }

    /// Full-text search across resources. A blank query matches nothing.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Storage` if the query fails.
    pub async fn search_resources(
        &self,
        query: &str,
        course: Option<&CourseId>,
        kind: Option<&str>,
    ) -> Result<Vec<SearchHit>, ResourceError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.analytics.search_resources(query, course, kind).await?)
    }

    /// View statistics for a course keyed by resource id.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Storage` if the query fails.
    pub async fn resource_analytics(
        &self,
        course: &CourseId,
    ) -> Result<BTreeMap<ResourceId, ResourceStats>, ResourceError> {
        let rows = self.analytics.resource_analytics(course).await?;
        Ok(rows
            .into_iter()
            .map(|stats| (stats.resource_id.clone(), stats))
            .collect())
    }

    //
    // ─── CATEGORY FAVORITES ────────────────────────────────────────────────────
    //

    /// Refresh the cached set of favorite categories.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Storage` if the rows cannot be read. Signed-out
    /// users simply have none.
    pub async fn load_category_favorites(&self) -> Result<BTreeSet<CategorySlug>, ResourceError> {
        let slugs: BTreeSet<CategorySlug> = match self.auth.current_user() {
            Some(user) => self
                .favorites
                .list_category_favorites(user.id)
                .await?
                .into_iter()
                .map(|row| row.category)
                .collect(),
            None => BTreeSet::new(),
        };
        *self
            .favorite_categories
            .write()
            .unwrap_or_else(PoisonError::into_inner) = slugs.clone();
        Ok(slugs)
    }

    #[must_use]
    pub fn is_category_favorited(&self, category: &CategorySlug) -> bool {
        self.favorite_categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(category)
    }

    /// Flip a category favorite and return the new state.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::NotAuthenticated` when nobody is signed in and
    /// `ResourceError::Storage` if the backend fails; the cached set is left
    /// unchanged on failure.
    pub async fn toggle_category_favorite(
        &self,
        category: &CategorySlug,
    ) -> Result<bool, ResourceError> {
        let user = self.auth.require_user()?;
        let favorited = self.is_category_favorited(category);

        let written = if favorited {
            self.favorites
                .delete_category_favorite(user.id, category)
                .await
        } else {
            self.favorites
                .insert_category_favorite(&CategoryFavoriteRecord {
                    user_id: user.id,
                    category: category.clone(),
                    created_at: self.clock.now(),
                })
                .await
        };
        if let Err(err) = written {
            self.notifier.report_error(&err, "Failed to update favorites");
            return Err(err.into());
        }

        let mut cached = self
            .favorite_categories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if favorited {
            cached.remove(category);
        } else {
            cached.insert(category.clone());
        }
        Ok(!favorited)
    }

    /// Favorite categories first, then by `sort_order`.
    #[must_use]
    pub fn sorted_categories(&self, categories: &[Category]) -> Vec<Category> {
        let favorites = self
            .favorite_categories
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut sorted = categories.to_vec();
        sorted.sort_by_key(|c| (!favorites.contains(&c.slug), c.sort_order));
        sorted
    }
}

fn not_found_as_resource(err: StorageError) -> ResourceError {
    match err {
        StorageError::NotFound => ResourceError::NotFound,
        other => ResourceError::Storage(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionUser;
    use learnhub_core::time::fixed_now;
    use storage::InMemoryRepository;
    use storage::content::StaticContentSource;

    fn category(slug: &str, sort_order: i32) -> Category {
        Category {
            slug: CategorySlug::new(slug),
            title: slug.to_uppercase(),
            description: None,
            icon: None,
            sort_order,
        }
    }

    fn service(auth: Arc<AuthState>) -> ResourceService {
        let repo = InMemoryRepository::new();
        let clock = Clock::fixed(fixed_now());
        ResourceService::new(
            clock,
            auth,
            Arc::new(StaticContentSource::new()),
            ResourceRepos {
                favorites: Arc::new(repo.clone()),
                views: Arc::new(repo.clone()),
                analytics: Arc::new(repo),
            },
            Arc::new(Notifier::new(clock)),
        )
    }

    #[test]
    fn content_paths_live_under_the_resource_category() {
        let course = CourseId::new("claude-code-training");
        assert_eq!(
            course_path(&course, "/resources/links.json"),
            "data/software-dev/claude-code-training/resources/links.json"
        );
    }

    #[tokio::test]
    async fn favorite_categories_sort_first() {
        let auth = Arc::new(AuthState::new());
        auth.sign_in(SessionUser::new(UserId::random(), "a@b.c"));
        let resources = service(auth);

        let categories = vec![category("a", 1), category("b", 2), category("c", 3)];
        assert!(resources.toggle_category_favorite(&CategorySlug::new("c")).await.unwrap());

        let sorted: Vec<_> = resources
            .sorted_categories(&categories)
            .into_iter()
            .map(|c| c.slug.to_string())
            .collect();
        assert_eq!(sorted, ["c", "a", "b"]);

        assert!(!resources.toggle_category_favorite(&CategorySlug::new("c")).await.unwrap());
        assert_eq!(resources.load_category_favorites().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn signed_out_users_cannot_toggle() {
        let resources = service(Arc::new(AuthState::new()));
        assert!(matches!(
            resources
                .toggle_favorite(&CourseId::new("c"), &ResourceId::new("r"))
                .await,
            Err(ResourceError::NotAuthenticated)
        ));
        assert!(resources.recently_viewed(10).await.unwrap().is_empty());
        assert!(resources.search_resources("   ", None, None).await.unwrap().is_empty());
    }
}
