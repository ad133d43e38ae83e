//! Seam between the core and the hosted backend. The production
//! implementations live under `supabase/`; tests use in-memory doubles that
//! count calls to assert the fail-fast and ownership guarantees.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MarketError;
use crate::models::{Listing, ListingPatch, NewListing, Profile, ProfilePatch, Role};

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Listings visible on the marketplace: status=available, newest first.
    async fn list_available(&self) -> Result<Vec<Listing>, MarketError>;

    /// Every listing a seller owns, newest first, all statuses.
    async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Listing>, MarketError>;

    async fn get(&self, id: Uuid) -> Result<Option<Listing>, MarketError>;

    async fn insert(&self, listing: &NewListing) -> Result<Listing, MarketError>;

    /// Applies `patch` to the row owned by `seller_id`. The whole patch is a
    /// single write; readers never observe a half-applied image sequence.
    async fn update(
        &self,
        id: Uuid,
        seller_id: Uuid,
        patch: &ListingPatch,
    ) -> Result<Listing, MarketError>;

    async fn delete(&self, id: Uuid, seller_id: Uuid) -> Result<(), MarketError>;

    async fn roles(&self, user_id: Uuid) -> Result<Vec<Role>, MarketError>;

    async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, MarketError>;

    /// Writes `patch` to the caller's own profile row.
    async fn update_profile(
        &self,
        user_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Profile, MarketError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores the bytes under `path` and returns a publicly resolvable URL.
    async fn upload(&self, path: &str, bytes: Vec<u8>, mime: &str)
    -> Result<String, MarketError>;

    async fn remove(&self, path: &str) -> Result<(), MarketError>;

    /// Derives the storage path from a public URL, or `None` when the URL
    /// does not follow this store's path convention.
    fn path_for_url(&self, url: &str) -> Option<String>;
}
