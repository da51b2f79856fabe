use learnhub_core::model::{
    CategorySlug, CourseId, PopularResource, ResourceId, ResourceStats, SearchHit, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{db_err, i64_from_u64, ser, u64_from_i64, user_id_from_row};
use crate::repository::{
    CategoryFavoriteRecord, FavoriteRecord, FavoriteRepository, ResourceAnalyticsRepository,
    ResourceViewRecord, ResourceViewRepository, StorageError,
};

fn map_view_row(row: &SqliteRow) -> Result<ResourceViewRecord, StorageError> {
    Ok(ResourceViewRecord {
        user_id: user_id_from_row(row, "user_id")?,
        course_id: CourseId::new(row.try_get::<String, _>("course_id").map_err(ser)?),
        resource_id: ResourceId::new(row.try_get::<String, _>("resource_id").map_err(ser)?),
        view_count: u64_from_i64(
            "view_count",
            row.try_get::<i64, _>("view_count").map_err(ser)?,
        )?,
        viewed_at: row.try_get("viewed_at").map_err(ser)?,
    })
}

#[async_trait::async_trait]
impl FavoriteRepository for SqliteRepository {
    async fn is_favorite(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<bool, StorageError> {
        let row = sqlx::query(
            r"
                SELECT 1 FROM favorite_resources
                WHERE user_id = ?1 AND course_id = ?2 AND resource_id = ?3
            ",
        )
        .bind(user.to_string())
        .bind(course.as_str())
        .bind(resource.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn insert_favorite(&self, record: &FavoriteRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO favorite_resources (user_id, course_id, resource_id, favorited_at)
                VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(record.user_id.to_string())
        .bind(record.course_id.as_str())
        .bind(record.resource_id.as_str())
        .bind(record.favorited_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_favorite(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
                DELETE FROM favorite_resources
                WHERE user_id = ?1 AND course_id = ?2 AND resource_id = ?3
            ",
        )
        .bind(user.to_string())
        .bind(course.as_str())
        .bind(resource.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_favorites(&self, user: UserId) -> Result<Vec<FavoriteRecord>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT user_id, course_id, resource_id, favorited_at
                FROM favorite_resources
                WHERE user_id = ?1
                ORDER BY favorited_at DESC
            ",
        )
        .bind(user.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(FavoriteRecord {
                user_id: user_id_from_row(&row, "user_id")?,
                course_id: CourseId::new(row.try_get::<String, _>("course_id").map_err(ser)?),
                resource_id: ResourceId::new(
                    row.try_get::<String, _>("resource_id").map_err(ser)?,
                ),
                favorited_at: row.try_get("favorited_at").map_err(ser)?,
            });
        }
        Ok(out)
    }

    async fn list_category_favorites(
        &self,
        user: UserId,
    ) -> Result<Vec<CategoryFavoriteRecord>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT user_id, category_slug, created_at
                FROM favorite_categories
                WHERE user_id = ?1
                ORDER BY created_at DESC
            ",
        )
        .bind(user.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(CategoryFavoriteRecord {
                user_id: user_id_from_row(&row, "user_id")?,
                category: CategorySlug::new(
                    row.try_get::<String, _>("category_slug").map_err(ser)?,
                ),
                created_at: row.try_get("created_at").map_err(ser)?,
            });
        }
        Ok(out)
    }

    async fn insert_category_favorite(
        &self,
        record: &CategoryFavoriteRecord,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO favorite_categories (user_id, category_slug, created_at)
                VALUES (?1, ?2, ?3)
            ",
        )
        .bind(record.user_id.to_string())
        .bind(record.category.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_category_favorite(
        &self,
        user: UserId,
        category: &CategorySlug,
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM favorite_categories WHERE user_id = ?1 AND category_slug = ?2")
            .bind(user.to_string())
            .bind(category.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ResourceViewRepository for SqliteRepository {
    async fn get_view(
        &self,
        user: UserId,
        course: &CourseId,
        resource: &ResourceId,
    ) -> Result<ResourceViewRecord, StorageError> {
        let row = sqlx::query(
            r"
                SELECT user_id, course_id, resource_id, view_count, viewed_at
                FROM resource_views
                WHERE user_id = ?1 AND course_id = ?2 AND resource_id = ?3
            ",
        )
        .bind(user.to_string())
        .bind(course.as_str())
        .bind(resource.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StorageError::NotFound)?;

        map_view_row(&row)
    }

    async fn upsert_view(&self, record: &ResourceViewRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO resource_views (user_id, course_id, resource_id, view_count, viewed_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(user_id, course_id, resource_id) DO UPDATE SET
                    view_count = excluded.view_count,
                    viewed_at = excluded.viewed_at
            ",
        )
        .bind(record.user_id.to_string())
        .bind(record.course_id.as_str())
        .bind(record.resource_id.as_str())
        .bind(i64_from_u64("view_count", record.view_count)?)
        .bind(record.viewed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn recent_views(
        &self,
        user: UserId,
        limit: u32,
    ) -> Result<Vec<ResourceViewRecord>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT user_id, course_id, resource_id, view_count, viewed_at
                FROM resource_views
                WHERE user_id = ?1
                ORDER BY viewed_at DESC
                LIMIT ?2
            ",
        )
        .bind(user.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_view_row).collect()
    }
}

#[async_trait::async_trait]
impl ResourceAnalyticsRepository for SqliteRepository {
    async fn resource_analytics(
        &self,
        course: &CourseId,
    ) -> Result<Vec<ResourceStats>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    resource_id,
                    SUM(view_count) AS total_views,
                    COUNT(DISTINCT user_id) AS unique_viewers,
                    MAX(viewed_at) AS last_viewed
                FROM resource_views
                WHERE course_id = ?1
                GROUP BY resource_id
                ORDER BY resource_id ASC
            ",
        )
        .bind(course.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let last_viewed: Option<String> = row.try_get("last_viewed").map_err(ser)?;
            out.push(ResourceStats {
                resource_id: ResourceId::new(
                    row.try_get::<String, _>("resource_id").map_err(ser)?,
                ),
                total_views: u64_from_i64(
                    "total_views",
                    row.try_get::<i64, _>("total_views").map_err(ser)?,
                )?,
                unique_viewers: u64_from_i64(
                    "unique_viewers",
                    row.try_get::<i64, _>("unique_viewers").map_err(ser)?,
                )?,
                last_viewed: last_viewed
                    .map(|raw| {
                        chrono::DateTime::parse_from_rfc3339(&raw)
                            .map(|dt| dt.with_timezone(&chrono::Utc))
                            .map_err(ser)
                    })
                    .transpose()?,
            });
        }
        Ok(out)
    }

    async fn popular_resources(&self, limit: u32) -> Result<Vec<PopularResource>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    v.course_id, v.resource_id, r.type, r.title, r.description, r.icon,
                    SUM(v.view_count) AS total_views,
                    COUNT(DISTINCT v.user_id) AS unique_viewers
                FROM resource_views v
                JOIN resources r ON r.course_id = v.course_id AND r.resource_id = v.resource_id
                GROUP BY v.course_id, v.resource_id
                ORDER BY total_views DESC, v.resource_id ASC
                LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(PopularResource {
                course_id: CourseId::new(row.try_get::<String, _>("course_id").map_err(ser)?),
                resource_id: ResourceId::new(
                    row.try_get::<String, _>("resource_id").map_err(ser)?,
                ),
                kind: row.try_get("type").map_err(ser)?,
                title: row.try_get("title").map_err(ser)?,
                description: row.try_get("description").map_err(ser)?,
                icon: row.try_get("icon").map_err(ser)?,
                total_views: u64_from_i64(
                    "total_views",
                    row.try_get::<i64, _>("total_views").map_err(ser)?,
                )?,
                unique_viewers: u64_from_i64(
                    "unique_viewers",
                    row.try_get::<i64, _>("unique_viewers").map_err(ser)?,
                )?,
            });
        }
        Ok(out)
    }

    async fn search_resources(
        &self,
        query: &str,
        course: Option<&CourseId>,
        kind: Option<&str>,
    ) -> Result<Vec<SearchHit>, StorageError> {
        let pattern = format!("%{}%", query.trim().to_lowercase());
        let rows = sqlx::query(
            r"
                SELECT
                    course_id, resource_id, type, title, description,
                    CASE
                        WHEN lower(title) LIKE ?1 THEN 1.0
                        WHEN lower(tags) LIKE ?1 THEN 0.75
                        ELSE 0.5
                    END AS rank
                FROM resources
                WHERE (lower(title) LIKE ?1 OR lower(tags) LIKE ?1 OR lower(COALESCE(description, '')) LIKE ?1)
                  AND (?2 IS NULL OR course_id = ?2)
                  AND (?3 IS NULL OR type = ?3)
                ORDER BY rank DESC, resource_id ASC
            ",
        )
        .bind(pattern)
        .bind(course.map(CourseId::as_str))
        .bind(kind)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(SearchHit {
                course_id: CourseId::new(row.try_get::<String, _>("course_id").map_err(ser)?),
                resource_id: ResourceId::new(
                    row.try_get::<String, _>("resource_id").map_err(ser)?,
                ),
                kind: row.try_get("type").map_err(ser)?,
                title: row.try_get("title").map_err(ser)?,
                description: row.try_get("description").map_err(ser)?,
                rank: row.try_get("rank").map_err(ser)?,
            });
        }
        Ok(out)
    }
}
