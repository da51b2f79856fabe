use async_trait::async_trait;
use chrono::{DateTime, Utc};
use learnhub_core::model::{NewProfile, Profile, ProfileUpdate, ProgressScope, UserId};
use reqwest::Method;
use serde_json::{Map, Value, json};

use super::rows::{AttemptRow, ModuleRow, convert_all};
use super::tables::{PROFILES, scope_filters, tables_for};
use super::{RestRepository, eq, send};
use crate::repository::{
    AdminRepository, AvatarStore, ModuleRecord, ProfileRepository, QuizAttemptRecord,
    StorageError,
};

#[async_trait]
impl ProfileRepository for RestRepository {
    async fn get_profile(&self, user: UserId) -> Result<Profile, StorageError> {
        self.select_one(PROFILES, &[eq("id", user)]).await
    }

    async fn insert_profile(
        &self,
        profile: &NewProfile,
        at: DateTime<Utc>,
    ) -> Result<Profile, StorageError> {
        let body = json!({
            "id": profile.id,
            "email": profile.email,
            "full_name": profile.full_name,
            "avatar_url": profile.avatar_url,
            "is_admin": profile.is_admin,
            "created_at": at,
        });
        self.insert_returning(PROFILES, &body).await
    }

    async fn update_profile(
        &self,
        user: UserId,
        update: &ProfileUpdate,
        at: DateTime<Utc>,
    ) -> Result<Profile, StorageError> {
        let mut body = Map::new();
        if let Some(name) = update.new_full_name() {
            body.insert("full_name".into(), json!(name));
        }
        if let Some(url) = update.new_avatar_url() {
            body.insert("avatar_url".into(), json!(url));
        }
        body.insert("updated_at".into(), json!(at));
        self.update_returning(PROFILES, &[eq("id", user)], &Value::Object(body))
            .await
    }
}

#[async_trait]
impl AvatarStore for RestRepository {
    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let req = self
            .request(Method::POST, self.object_url(path)?)
            .header("Content-Type", content_type)
            .header("Cache-Control", "3600")
            .header("x-upsert", "false")
            .body(bytes.to_vec());
        send(req).await?;
        Ok(format!("{}{path}", self.public_object_prefix()))
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let req = self.request(Method::DELETE, self.object_url(path)?);
        send(req).await.map(drop)
    }

    fn path_from_url(&self, url: &str) -> Option<String> {
        let marker = "/storage/v1/object/public/avatars/";
        url.split_once(marker)
            .map(|(_, path)| path.to_string())
            .filter(|path| !path.is_empty())
    }
}

#[async_trait]
impl AdminRepository for RestRepository {
    async fn list_profiles(&self) -> Result<Vec<Profile>, StorageError> {
        self.select(PROFILES, &[("order".into(), "created_at.desc".into())])
            .await
    }

    async fn list_all_modules(
        &self,
        scope: &ProgressScope,
    ) -> Result<Vec<ModuleRecord>, StorageError> {
        let rows: Vec<ModuleRow> = self
            .select(tables_for(scope).modules, &scope_filters(None, scope))
            .await?;
        convert_all(rows)
    }

    async fn list_all_attempts(
        &self,
        scope: &ProgressScope,
    ) -> Result<Vec<QuizAttemptRecord>, StorageError> {
        let mut filters = scope_filters(None, scope);
        filters.push(("order".into(), "completed_at.desc".into()));
        let rows: Vec<AttemptRow> = self.select(tables_for(scope).attempts, &filters).await?;
        convert_all(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn avatar_paths_round_trip_through_public_urls() {
        let repo = RestRepository::new(
            reqwest::Client::new(),
            Url::parse("https://db.example.com/").unwrap(),
            "anon",
        );
        let url = format!("{}avatars/u-1.png", repo.public_object_prefix());
        assert_eq!(
            url,
            "https://db.example.com/storage/v1/object/public/avatars/avatars/u-1.png"
        );
        assert_eq!(repo.path_from_url(&url).as_deref(), Some("avatars/u-1.png"));
        assert_eq!(repo.path_from_url("https://cdn.example.com/a.png"), None);
    }
}
