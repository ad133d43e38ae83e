//! PostgREST client for the `listings`, `profiles` and `user_roles` tables.
//! Runs with the service key; ownership checks happen in the lifecycle layer
//! before any scoped write is issued.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;
use uuid::Uuid;

use crate::error::MarketError;
use crate::http::build_client;
use crate::models::{Listing, ListingPatch, NewListing, Profile, ProfilePatch, Role};
use crate::store::ListingStore;
use crate::supabase::config::{REST_ROOT, SERVICE_KEY};

#[derive(Debug, Clone)]
pub struct SupabaseRest {
    root: String,
    service_key: String,
    http: Client,
}

impl SupabaseRest {
    pub fn from_env() -> Self {
        Self {
            root: REST_ROOT.clone(),
            service_key: SERVICE_KEY.clone(),
            http: build_client(),
        }
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        op: &'static str,
        builder: RequestBuilder,
    ) -> Result<Vec<T>, MarketError> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|err| MarketError::transport(op, err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(op, status));
        }
        response
            .json::<Vec<T>>()
            .await
            .map_err(|err| MarketError::transport(op, format!("invalid response: {err}")))
    }
}

fn classify_status(op: &'static str, status: StatusCode) -> MarketError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            MarketError::permission(op, format!("HTTP {status}"))
        }
        StatusCode::NOT_FOUND => MarketError::not_found(op, format!("HTTP {status}")),
        StatusCode::CONFLICT => MarketError::conflict(op, format!("HTTP {status}")),
        _ => MarketError::transport(op, format!("HTTP {status}")),
    }
}

#[derive(Debug, Deserialize)]
struct RoleRow {
    role: String,
}

#[async_trait]
impl ListingStore for SupabaseRest {
    async fn list_available(&self) -> Result<Vec<Listing>, MarketError> {
        let url = format!(
            "{}/listings?status=eq.available&select=*&order=created_at.desc",
            self.root
        );
        self.fetch_rows("list_listings", self.http.get(url)).await
    }

    async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Listing>, MarketError> {
        let url = format!(
            "{}/listings?seller_id=eq.{}&select=*&order=created_at.desc",
            self.root, seller_id
        );
        self.fetch_rows("list_seller_listings", self.http.get(url))
            .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Listing>, MarketError> {
        let url = format!("{}/listings?id=eq.{}&select=*&limit=1", self.root, id);
        let mut rows: Vec<Listing> = self.fetch_rows("get_listing", self.http.get(url)).await?;
        Ok(rows.pop())
    }

    async fn insert(&self, listing: &NewListing) -> Result<Listing, MarketError> {
        let url = format!("{}/listings", self.root);
        let builder = self
            .http
            .post(url)
            .header("Prefer", "return=representation")
            .json(listing);
        let mut rows: Vec<Listing> = self.fetch_rows("insert_listing", builder).await?;
        rows.pop()
            .ok_or_else(|| MarketError::transport("insert_listing", "empty insert response"))
    }

    async fn update(
        &self,
        id: Uuid,
        seller_id: Uuid,
        patch: &ListingPatch,
    ) -> Result<Listing, MarketError> {
        let url = format!(
            "{}/listings?id=eq.{}&seller_id=eq.{}",
            self.root, id, seller_id
        );
        let builder = self
            .http
            .patch(url)
            .header("Prefer", "return=representation")
            .json(patch);
        let mut rows: Vec<Listing> = self.fetch_rows("update_listing", builder).await?;
        rows.pop().ok_or_else(|| {
            MarketError::not_found("update_listing", "no row matched id and owner")
        })
    }

    async fn delete(&self, id: Uuid, seller_id: Uuid) -> Result<(), MarketError> {
        let url = format!(
            "{}/listings?id=eq.{}&seller_id=eq.{}",
            self.root, id, seller_id
        );
        let builder = self
            .http
            .delete(url)
            .header("Prefer", "return=representation");
        let rows: Vec<Listing> = self.fetch_rows("delete_listing", builder).await?;
        if rows.is_empty() {
            return Err(MarketError::not_found(
                "delete_listing",
                "no row matched id and owner",
            ));
        }
        Ok(())
    }

    async fn roles(&self, user_id: Uuid) -> Result<Vec<Role>, MarketError> {
        let url = format!(
            "{}/user_roles?user_id=eq.{}&select=role",
            self.root, user_id
        );
        let rows: Vec<RoleRow> = self.fetch_rows("list_roles", self.http.get(url)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let parsed = Role::from_label(&row.role);
                if parsed.is_none() {
                    warn!(
                        target = "gasbora.supabase",
                        role = %row.role,
                        "unknown role label skipped"
                    );
                }
                parsed
            })
            .collect())
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, MarketError> {
        let url = format!(
            "{}/profiles?user_id=eq.{}&select=*&limit=1",
            self.root, user_id
        );
        let mut rows: Vec<Profile> = self.fetch_rows("get_profile", self.http.get(url)).await?;
        Ok(rows.pop())
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Profile, MarketError> {
        let url = format!("{}/profiles?user_id=eq.{}", self.root, user_id);
        let builder = self
            .http
            .patch(url)
            .header("Prefer", "return=representation")
            .json(patch);
        let mut rows: Vec<Profile> = self.fetch_rows("update_profile", builder).await?;
        rows.pop()
            .ok_or_else(|| MarketError::not_found("update_profile", "profile not found"))
    }
}
