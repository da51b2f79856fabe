use async_trait::async_trait;
use learnhub_core::model::{
    CategorySlug, CourseId, PopularResource, ResourceId, ResourceStats, SearchHit, UserId,
};
use serde_json::json;

use super::rows::{CategoryFavoriteRow, FavoriteRow, ViewRow};
use super::tables::{
    FAVORITE_CATEGORIES, FAVORITE_RESOURCES, RESOURCE_VIEWS, RPC_POPULAR_RESOURCES,
    RPC_RESOURCE_ANALYTICS, RPC_SEARCH_RESOURCES,
};
use super::{RestRepository, eq};
use crate::repository::{
    CategoryFavoriteRecord, FavoriteRecord, FavoriteRepository, ResourceAnalyticsRepository,
    ResourceViewRecord, ResourceViewRepository, StorageError,
};

fn resource_filters(user: UserId, course: &CourseId, resource: &ResourceId) -> Vec<(String, String)> {
    vec![
        eq("user_id", user),
        eq("course_id", course),
        eq("resource_id", resource),
    ]
}

#[async_trait]
impl FavoriteRepository for RestRepository {
    async fn is_favorite(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<bool, StorageError> {
        match self
            .select_one::<FavoriteRow>(FAVORITE_RESOURCES, &resource_filters(user, course, resource))
            .await
        {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn insert_favorite(&self, record: &FavoriteRecord) -> Result<(), StorageError> {
        let body = json!({
            "user_id": record.user_id,
            "course_id": record.course_id,
            "resource_id": record.resource_id,
            "is_favorited": true,
            "favorited_at": record.favorited_at,
        });
        self.insert(FAVORITE_RESOURCES, &body).await
    }

    async fn delete_favorite(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<(), StorageError> {
        self.delete(FAVORITE_RESOURCES, &resource_filters(user, course, resource))
            .await
    }

    async fn list_favorites(&self, user: UserId) -> Result<Vec<FavoriteRecord>, StorageError> {
        let filters = vec![
            eq("user_id", user),
            eq("is_favorited", true),
            ("order".into(), "favorited_at.desc".into()),
        ];
        let rows: Vec<FavoriteRow> = self.select(FAVORITE_RESOURCES, &filters).await?;
        Ok(rows.into_iter().map(FavoriteRecord::from).collect())
    }

    async fn list_category_favorites(
        &self,
        user: UserId,
    ) -> Result<Vec<CategoryFavoriteRecord>, StorageError> {
        let filters = vec![
            eq("user_id", user),
            ("order".into(), "created_at.desc".into()),
        ];
        let rows: Vec<CategoryFavoriteRow> = self.select(FAVORITE_CATEGORIES, &filters).await?;
        Ok(rows.into_iter().map(CategoryFavoriteRecord::from).collect())
    }

    async fn insert_category_favorite(
        &self,
        record: &CategoryFavoriteRecord,
    ) -> Result<(), StorageError> {
        let body = json!({
            "user_id": record.user_id,
            "category_slug": record.category,
            "created_at": record.created_at,
        });
        self.insert(FAVORITE_CATEGORIES, &body).await
    }

    async fn delete_category_favorite(
        &self,
        user: UserId,
        category: &CategorySlug,
    ) -> Result<(), StorageError> {
        self.delete(
            FAVORITE_CATEGORIES,
            &[eq("user_id", user), eq("category_slug", category)],
        )
        .await
    }
}

#[async_trait]
impl ResourceViewRepository for RestRepository {
    async fn get_view(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<ResourceViewRecord, StorageError> {
        let row: ViewRow = self
            .select_one(RESOURCE_VIEWS, &resource_filters(user, course, resource))
            .await?;
        Ok(row.into())
    }

    async fn upsert_view(&self, record: &ResourceViewRecord) -> Result<(), StorageError> {
        let body = json!({
            "user_id": record.user_id,
            "course_id": record.course_id,
            "resource_id": record.resource_id,
            "view_count": record.view_count,
            "viewed_at": record.viewed_at,
        });
        self.upsert(RESOURCE_VIEWS, "user_id,course_id,resource_id", &body)
            .await
    }

    async fn recent_views(
        &self,
        user: UserId,
        limit: u32,
    ) -> Result<Vec<ResourceViewRecord>, StorageError> {
        let filters = vec![
            eq("user_id", user),
            ("order".into(), "viewed_at.desc".into()),
            ("limit".into(), limit.to_string()),
        ];
        let rows: Vec<ViewRow> = self.select(RESOURCE_VIEWS, &filters).await?;
        Ok(rows.into_iter().map(ResourceViewRecord::from).collect())
    }
}

#[async_trait]
impl ResourceAnalyticsRepository for RestRepository {
    async fn resource_analytics(
        &self,
        course: &CourseId,
    ) -> Result<Vec<ResourceStats>, StorageError> {
        self.rpc(RPC_RESOURCE_ANALYTICS, &json!({ "course_id_param": course }))
            .await
    }

    async fn popular_resources(&self, limit: u32) -> Result<Vec<PopularResource>, StorageError> {
        self.rpc(RPC_POPULAR_RESOURCES, &json!({ "limit_param": limit }))
            .await
    }

    async fn search_resources(
        &self,
        query: &str,
        course: Option<&CourseId>,
        kind: Option<&str>,
    ) -> Result<Vec<SearchHit>, StorageError> {
        let args = json!({
            "search_query": query,
            "course_filter": course,
            "type_filter": kind,
        });
        self.rpc(RPC_SEARCH_RESOURCES, &args).await
    }
}
