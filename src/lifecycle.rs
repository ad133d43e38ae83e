//! Listing lifecycle: validation, role gating, persistence and image
//! coordination. Local checks (validation, image cap, file type/size) always
//! run before the first network call; remote image cleanup is best-effort and
//! never blocks the operation that triggered it.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::MarketError;
use crate::models::{
    ImageSet, Listing, ListingPatch, ListingStatus, NewListing, Profile, ProfilePatch,
};
use crate::query::{ListingQuery, price_ceiling};
use crate::store::{ListingStore, ObjectStore};
use crate::validate::{self, RawListingInput, RawProfileInput};

/// Per-file upload ceiling, matching the storage bucket policy.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

pub struct ListingManager<L, O> {
    listings: Arc<L>,
    objects: Arc<O>,
}

impl<L, O> Clone for ListingManager<L, O> {
    fn clone(&self) -> Self {
        Self {
            listings: self.listings.clone(),
            objects: self.objects.clone(),
        }
    }
}

/// One marketplace browse response: the visible subset plus the slider bound
/// recomputed from the fresh fetch.
#[derive(Debug, Serialize)]
pub struct MarketplacePage {
    pub listings: Vec<Listing>,
    pub total: usize,
    pub price_ceiling: f64,
}

#[derive(Debug, Serialize)]
pub struct ListingDetail {
    pub listing: Listing,
    pub seller: Option<Profile>,
    /// Seller phone normalized for a WhatsApp deep link, when known.
    pub seller_whatsapp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_listings: usize,
    pub active_listings: usize,
    pub stock_value: f64,
}

#[derive(Debug, Serialize)]
pub struct DashboardPage {
    pub listings: Vec<Listing>,
    pub stats: DashboardStats,
}

/// Outcome of the best-effort image cleanup that follows a record delete.
#[derive(Debug, Serialize)]
pub struct CleanupReport {
    pub images_total: usize,
    pub images_removed: usize,
    pub images_skipped: usize,
}

#[derive(Debug, Serialize)]
pub struct ImageRemoval {
    /// False when the URL did not match the storage convention or the remote
    /// delete failed; the caller drops the URL from its sequence either way.
    pub remote_removed: bool,
}

pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub mime: String,
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime.trim().to_lowercase().as_str() {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

impl<L: ListingStore, O: ObjectStore> ListingManager<L, O> {
    pub fn new(listings: Arc<L>, objects: Arc<O>) -> Self {
        Self { listings, objects }
    }

    /// Marketplace browse: fetch the available set, derive the price bound
    /// from it, then run the pure query engine.
    pub async fn browse(&self, query: &ListingQuery) -> Result<MarketplacePage, MarketError> {
        let records = self.listings.list_available().await?;
        let ceiling = price_ceiling(&records);
        let visible = query.apply(&records);
        Ok(MarketplacePage {
            total: visible.len(),
            listings: visible,
            price_ceiling: ceiling,
        })
    }

    pub async fn detail(&self, id: Uuid) -> Result<ListingDetail, MarketError> {
        let listing = self
            .listings
            .get(id)
            .await?
            .ok_or_else(|| MarketError::not_found("get_listing", "listing not found"))?;
        let seller = match self.listings.profile(listing.seller_id).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(
                    target = "gasbora.lifecycle",
                    listing_id = %id,
                    error = %err,
                    "seller profile lookup failed"
                );
                None
            }
        };
        let seller_whatsapp = seller.as_ref().and_then(Profile::whatsapp_phone);
        Ok(ListingDetail {
            listing,
            seller,
            seller_whatsapp,
        })
    }

    pub async fn dashboard(&self, seller_id: Uuid) -> Result<DashboardPage, MarketError> {
        let listings = self.listings.list_by_seller(seller_id).await?;
        let active_listings = listings
            .iter()
            .filter(|l| l.status == ListingStatus::Available)
            .count();
        let stock_value = listings
            .iter()
            .map(|l| l.price * f64::from(l.quantity))
            .sum();
        Ok(DashboardPage {
            stats: DashboardStats {
                total_listings: listings.len(),
                active_listings,
                stock_value,
            },
            listings,
        })
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<Profile, MarketError> {
        self.listings
            .profile(user_id)
            .await?
            .ok_or_else(|| MarketError::not_found("get_profile", "profile not found"))
    }

    /// Self-service profile edit. The session identity is the row scope, so
    /// there is no separate ownership check to make.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        raw: &RawProfileInput,
    ) -> Result<Profile, MarketError> {
        let validated = validate::profile(raw)
            .map_err(|fields| MarketError::validation("update_profile", fields))?;
        let patch = ProfilePatch {
            full_name: validated.full_name,
            phone: validated.phone,
        };
        self.listings.update_profile(user_id, &patch).await
    }

    pub async fn create(
        &self,
        seller_id: Uuid,
        raw: &RawListingInput,
        images: Vec<String>,
    ) -> Result<Listing, MarketError> {
        let validated = validate::listing(raw)
            .map_err(|fields| MarketError::validation("create_listing", fields))?;
        let images = ImageSet::new(images)?;

        let roles = self.listings.roles(seller_id).await?;
        if !roles.iter().any(|role| role.can_sell()) {
            return Err(MarketError::permission(
                "create_listing",
                "a seller, station or admin role is required to create listings",
            ));
        }

        let record = NewListing {
            seller_id,
            title: validated.title,
            description: validated.description,
            brand: validated.brand,
            cylinder_size: validated.cylinder_size,
            price: validated.price,
            quantity: validated.quantity,
            is_refill: validated.is_refill,
            location: validated.location,
            image_url: images.primary().map(str::to_string),
            images,
            status: ListingStatus::Available,
        };
        let created = self.listings.insert(&record).await?;
        info!(
            target = "gasbora.lifecycle",
            listing_id = %created.id,
            seller_id = %seller_id,
            "listing created"
        );
        Ok(created)
    }

    /// Full-form edit. The image sequence (and its derived legacy field) goes
    /// out in the same write as the rest of the patch, so readers never see a
    /// half-replaced sequence.
    pub async fn update(
        &self,
        seller_id: Uuid,
        id: Uuid,
        raw: &RawListingInput,
        images: Vec<String>,
    ) -> Result<Listing, MarketError> {
        let validated = validate::listing(raw)
            .map_err(|fields| MarketError::validation("update_listing", fields))?;
        let images = ImageSet::new(images)?;

        self.owned_listing("update_listing", id, seller_id).await?;

        let patch = ListingPatch {
            title: Some(validated.title),
            description: Some(validated.description),
            brand: Some(validated.brand),
            cylinder_size: Some(validated.cylinder_size),
            price: Some(validated.price),
            quantity: Some(validated.quantity),
            is_refill: Some(validated.is_refill),
            location: Some(validated.location),
            image_url: Some(images.primary().map(str::to_string)),
            images: Some(images),
            status: None,
        };
        self.listings.update(id, seller_id, &patch).await
    }

    /// Appends one image URL to the sequence, capacity permitting. The
    /// derived legacy field rides along in the same write.
    pub async fn add_image(
        &self,
        seller_id: Uuid,
        id: Uuid,
        url: String,
    ) -> Result<Listing, MarketError> {
        let listing = self.owned_listing("add_listing_image", id, seller_id).await?;
        let mut images = listing.images;
        images.push(url)?;
        let patch = ListingPatch {
            image_url: Some(images.primary().map(str::to_string)),
            images: Some(images),
            ..ListingPatch::default()
        };
        self.listings.update(id, seller_id, &patch).await
    }

    /// Splices out the image at `index`. A removed first element promotes the
    /// next one to display image; the stored object is cleaned up best-effort
    /// after the record write succeeds.
    pub async fn remove_image_at(
        &self,
        seller_id: Uuid,
        id: Uuid,
        index: usize,
    ) -> Result<Listing, MarketError> {
        let listing = self
            .owned_listing("remove_listing_image", id, seller_id)
            .await?;
        let mut images = listing.images;
        let Some(removed) = images.remove(index) else {
            return Err(MarketError::not_found(
                "remove_listing_image",
                "no image at that position",
            ));
        };
        let patch = ListingPatch {
            image_url: Some(images.primary().map(str::to_string)),
            images: Some(images),
            ..ListingPatch::default()
        };
        let updated = self.listings.update(id, seller_id, &patch).await?;
        self.remove_image(&removed).await;
        Ok(updated)
    }

    /// Flips strictly between available and sold; a reserved listing is not
    /// reachable (or leavable) through this path.
    pub async fn toggle_status(&self, seller_id: Uuid, id: Uuid) -> Result<Listing, MarketError> {
        let current = self.owned_listing("toggle_status", id, seller_id).await?;
        let next = match current.status {
            ListingStatus::Available => ListingStatus::Sold,
            ListingStatus::Sold => ListingStatus::Available,
            ListingStatus::Reserved => {
                return Err(MarketError::conflict(
                    "toggle_status",
                    "reserved listings cannot be toggled",
                ));
            }
        };
        let patch = ListingPatch {
            status: Some(next),
            ..ListingPatch::default()
        };
        self.listings.update(id, seller_id, &patch).await
    }

    /// Deletes the record, then attempts to delete every stored image. The
    /// record delete is the required step; each image delete is independent
    /// and a failure only counts against the report.
    pub async fn delete(&self, seller_id: Uuid, id: Uuid) -> Result<CleanupReport, MarketError> {
        let listing = self.owned_listing("delete_listing", id, seller_id).await?;

        let mut urls: Vec<String> = listing.images.urls().to_vec();
        if listing.images.is_empty()
            && let Some(legacy) = listing.display_image()
        {
            urls.push(legacy.to_string());
        }

        self.listings.delete(id, seller_id).await?;
        info!(
            target = "gasbora.lifecycle",
            listing_id = %id,
            seller_id = %seller_id,
            images = urls.len(),
            "listing deleted"
        );

        let mut removed = 0usize;
        for url in &urls {
            if self.remove_image(url).await.remote_removed {
                removed += 1;
            }
        }
        Ok(CleanupReport {
            images_total: urls.len(),
            images_removed: removed,
            images_skipped: urls.len() - removed,
        })
    }

    /// Type and size run before any network call; a rejected file never
    /// produces a partial upload.
    pub async fn upload_image(
        &self,
        owner_id: Uuid,
        upload: ImageUpload,
    ) -> Result<String, MarketError> {
        let Some(ext) = extension_for_mime(&upload.mime) else {
            return Err(MarketError::invalid_field(
                "upload_image",
                "file",
                "Please upload a JPEG, PNG, WebP, or GIF image.",
            ));
        };
        if upload.bytes.len() > MAX_IMAGE_BYTES {
            return Err(MarketError::capacity(
                "upload_image",
                "Please upload an image smaller than 5MB.",
            ));
        }

        // Millisecond timestamp plus a random suffix; collisions within the
        // same owner namespace would need two uploads in the same millisecond
        // drawing the same 16-bit value.
        let path = format!(
            "{}/{}_{:04x}.{}",
            owner_id,
            Utc::now().timestamp_millis(),
            rand::random::<u16>(),
            ext
        );
        self.objects.upload(&path, upload.bytes, &upload.mime).await
    }

    /// Best-effort: a URL outside the storage convention skips the remote
    /// delete (it may be stale or foreign), and a failed remote delete leaves
    /// an orphaned object behind. Neither blocks the caller.
    pub async fn remove_image(&self, url: &str) -> ImageRemoval {
        let Some(path) = self.objects.path_for_url(url) else {
            warn!(
                target = "gasbora.lifecycle",
                url = %url,
                "image url outside storage convention, remote delete skipped"
            );
            return ImageRemoval {
                remote_removed: false,
            };
        };
        match self.objects.remove(&path).await {
            Ok(()) => ImageRemoval {
                remote_removed: true,
            },
            Err(err) => {
                warn!(
                    target = "gasbora.lifecycle",
                    path = %path,
                    error = %err,
                    "image delete failed, object orphaned"
                );
                ImageRemoval {
                    remote_removed: false,
                }
            }
        }
    }

    /// Fetch-then-compare ownership precondition shared by every scoped
    /// mutation: missing record and foreign record stay distinguishable.
    async fn owned_listing(
        &self,
        op: &'static str,
        id: Uuid,
        seller_id: Uuid,
    ) -> Result<Listing, MarketError> {
        let listing = self
            .listings
            .get(id)
            .await?
            .ok_or_else(|| MarketError::not_found(op, "listing not found"))?;
        if listing.seller_id != seller_id {
            return Err(MarketError::permission(op, "not the listing owner"));
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketErrorKind;
    use crate::models::{CylinderSize, Role};
    use crate::store::{ListingStore, ObjectStore};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemListings {
        rows: Mutex<Vec<Listing>>,
        roles: Mutex<HashMap<Uuid, Vec<Role>>>,
        profiles: Mutex<HashMap<Uuid, Profile>>,
        role_calls: AtomicUsize,
        insert_calls: AtomicUsize,
        update_calls: AtomicUsize,
        delete_calls: AtomicUsize,
        profile_update_calls: AtomicUsize,
    }

    impl MemListings {
        fn grant(&self, user: Uuid, roles: &[Role]) {
            self.roles.lock().unwrap().insert(user, roles.to_vec());
        }

        fn seed(&self, listing: Listing) {
            self.rows.lock().unwrap().push(listing);
        }

        fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    fn apply_patch(row: &mut Listing, patch: &ListingPatch) {
        if let Some(v) = &patch.title {
            row.title = v.clone();
        }
        if let Some(v) = &patch.description {
            row.description = v.clone();
        }
        if let Some(v) = &patch.brand {
            row.brand = v.clone();
        }
        if let Some(v) = patch.cylinder_size {
            row.cylinder_size = v;
        }
        if let Some(v) = patch.price {
            row.price = v;
        }
        if let Some(v) = patch.quantity {
            row.quantity = v;
        }
        if let Some(v) = patch.is_refill {
            row.is_refill = v;
        }
        if let Some(v) = &patch.location {
            row.location = v.clone();
        }
        if let Some(v) = &patch.images {
            row.images = v.clone();
        }
        if let Some(v) = &patch.image_url {
            row.image_url = v.clone();
        }
        if let Some(v) = patch.status {
            row.status = v;
        }
    }

    #[async_trait]
    impl ListingStore for MemListings {
        async fn list_available(&self) -> Result<Vec<Listing>, MarketError> {
            let mut rows: Vec<Listing> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.status == ListingStatus::Available)
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(rows)
        }

        async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Listing>, MarketError> {
            let mut rows: Vec<Listing> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.seller_id == seller_id)
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(rows)
        }

        async fn get(&self, id: Uuid) -> Result<Option<Listing>, MarketError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|l| l.id == id)
                .cloned())
        }

        async fn insert(&self, listing: &NewListing) -> Result<Listing, MarketError> {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            let row = Listing {
                id: Uuid::new_v4(),
                seller_id: listing.seller_id,
                title: listing.title.clone(),
                description: listing.description.clone(),
                brand: listing.brand.clone(),
                cylinder_size: listing.cylinder_size,
                price: listing.price,
                quantity: listing.quantity,
                is_refill: listing.is_refill,
                location: listing.location.clone(),
                images: listing.images.clone(),
                image_url: listing.image_url.clone(),
                status: listing.status,
                created_at: Utc::now(),
            };
            self.rows.lock().unwrap().push(row.clone());
            Ok(row)
        }

        async fn update(
            &self,
            id: Uuid,
            seller_id: Uuid,
            patch: &ListingPatch,
        ) -> Result<Listing, MarketError> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|l| l.id == id && l.seller_id == seller_id)
                .ok_or_else(|| {
                    MarketError::not_found("update_listing", "no row matched id and owner")
                })?;
            apply_patch(row, patch);
            Ok(row.clone())
        }

        async fn delete(&self, id: Uuid, seller_id: Uuid) -> Result<(), MarketError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|l| !(l.id == id && l.seller_id == seller_id));
            if rows.len() == before {
                return Err(MarketError::not_found(
                    "delete_listing",
                    "no row matched id and owner",
                ));
            }
            Ok(())
        }

        async fn roles(&self, user_id: Uuid) -> Result<Vec<Role>, MarketError> {
            self.role_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .roles
                .lock()
                .unwrap()
                .get(&user_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, MarketError> {
            Ok(self.profiles.lock().unwrap().get(&user_id).cloned())
        }

        async fn update_profile(
            &self,
            user_id: Uuid,
            patch: &ProfilePatch,
        ) -> Result<Profile, MarketError> {
            self.profile_update_calls.fetch_add(1, Ordering::SeqCst);
            let mut profiles = self.profiles.lock().unwrap();
            let row = profiles.get_mut(&user_id).ok_or_else(|| {
                MarketError::not_found("update_profile", "profile not found")
            })?;
            row.full_name = patch.full_name.clone();
            row.phone = patch.phone.clone();
            Ok(row.clone())
        }
    }

    #[derive(Default)]
    struct MemObjects {
        upload_calls: AtomicUsize,
        remove_calls: AtomicUsize,
        failing_paths: Mutex<HashSet<String>>,
    }

    const MEM_PREFIX: &str = "https://mem.store/object/public/listing-images/";

    #[async_trait]
    impl ObjectStore for MemObjects {
        async fn upload(
            &self,
            path: &str,
            _bytes: Vec<u8>,
            _mime: &str,
        ) -> Result<String, MarketError> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{MEM_PREFIX}{path}"))
        }

        async fn remove(&self, path: &str) -> Result<(), MarketError> {
            self.remove_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_paths.lock().unwrap().contains(path) {
                return Err(MarketError::transport("delete_object", "HTTP 503"));
            }
            Ok(())
        }

        fn path_for_url(&self, url: &str) -> Option<String> {
            url.strip_prefix(MEM_PREFIX)
                .filter(|path| !path.is_empty())
                .map(str::to_string)
        }
    }

    fn manager() -> (
        ListingManager<MemListings, MemObjects>,
        Arc<MemListings>,
        Arc<MemObjects>,
    ) {
        let listings = Arc::new(MemListings::default());
        let objects = Arc::new(MemObjects::default());
        (
            ListingManager::new(listings.clone(), objects.clone()),
            listings,
            objects,
        )
    }

    fn valid_raw() -> RawListingInput {
        RawListingInput {
            title: "6kg K-Gas Cylinder".to_string(),
            description: "Gently used, valve replaced".to_string(),
            brand: "K-Gas".to_string(),
            cylinder_size: "6kg".to_string(),
            price: "1200.50".to_string(),
            quantity: "3".to_string(),
            is_refill: false,
            location: "Juja, JKUAT Area".to_string(),
        }
    }

    fn image_url(name: &str) -> String {
        format!("{MEM_PREFIX}owner/{name}.jpg")
    }

    #[tokio::test]
    async fn create_then_get_round_trips_validated_fields() {
        let (manager, listings, _) = manager();
        let seller = Uuid::new_v4();
        listings.grant(seller, &[Role::Seller]);

        let images = vec![image_url("a"), image_url("b")];
        let created = manager
            .create(seller, &valid_raw(), images.clone())
            .await
            .expect("create");

        assert_eq!(created.title, "6kg K-Gas Cylinder");
        assert_eq!(created.cylinder_size, CylinderSize::Kg6);
        assert_eq!(created.price, 1200.50);
        assert_eq!(created.quantity, 3);
        assert_eq!(created.status, ListingStatus::Available);
        assert_eq!(created.seller_id, seller);
        assert_eq!(created.image_url.as_deref(), Some(images[0].as_str()));

        let fetched = listings.get(created.id).await.unwrap().expect("persisted");
        assert_eq!(fetched.title, created.title);
        assert_eq!(fetched.price, created.price);
        assert_eq!(fetched.images.urls(), images.as_slice());
    }

    #[tokio::test]
    async fn create_without_seller_role_fails_before_any_write() {
        let (manager, listings, _) = manager();
        let buyer = Uuid::new_v4();
        listings.grant(buyer, &[Role::Buyer]);

        let err = manager
            .create(buyer, &valid_raw(), vec![])
            .await
            .expect_err("buyers cannot sell");
        assert_eq!(err.kind(), MarketErrorKind::Permission);
        assert_eq!(listings.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_input_short_circuits_before_network() {
        let (manager, listings, _) = manager();
        let seller = Uuid::new_v4();
        listings.grant(seller, &[Role::Seller]);

        let mut raw = valid_raw();
        raw.title = "ab".to_string();
        let err = manager
            .create(seller, &raw, vec![])
            .await
            .expect_err("title too short");
        assert_eq!(err.kind(), MarketErrorKind::Validation);
        assert_eq!(listings.role_calls.load(Ordering::SeqCst), 0);
        assert_eq!(listings.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn six_images_are_rejected_locally() {
        let (manager, listings, _) = manager();
        let seller = Uuid::new_v4();
        listings.grant(seller, &[Role::Seller]);

        let images = (0..6).map(|n| image_url(&n.to_string())).collect();
        let err = manager
            .create(seller, &valid_raw(), images)
            .await
            .expect_err("over the cap");
        assert_eq!(err.kind(), MarketErrorKind::Capacity);
        assert_eq!(listings.role_calls.load(Ordering::SeqCst), 0);
        assert_eq!(listings.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_by_non_owner_issues_no_store_delete() {
        let (manager, listings, _) = manager();
        let owner = Uuid::new_v4();
        listings.grant(owner, &[Role::Seller]);
        let created = manager
            .create(owner, &valid_raw(), vec![])
            .await
            .expect("create");

        let stranger = Uuid::new_v4();
        let err = manager
            .delete(stranger, created.id)
            .await
            .expect_err("not the owner");
        assert_eq!(err.kind(), MarketErrorKind::Permission);
        assert_eq!(listings.delete_calls.load(Ordering::SeqCst), 0);
        assert_eq!(listings.row_count(), 1);
    }

    #[tokio::test]
    async fn delete_removes_record_and_reports_best_effort_cleanup() {
        let (manager, listings, objects) = manager();
        let owner = Uuid::new_v4();
        listings.grant(owner, &[Role::Seller]);
        let images = vec![image_url("a"), image_url("b"), image_url("c")];
        let created = manager
            .create(owner, &valid_raw(), images)
            .await
            .expect("create");

        objects
            .failing_paths
            .lock()
            .unwrap()
            .insert("owner/b.jpg".to_string());

        let report = manager.delete(owner, created.id).await.expect("delete");
        assert_eq!(listings.row_count(), 0);
        assert_eq!(report.images_total, 3);
        assert_eq!(report.images_removed, 2);
        assert_eq!(report.images_skipped, 1);
        assert_eq!(objects.remove_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn delete_falls_back_to_legacy_image_url() {
        let (manager, listings, objects) = manager();
        let owner = Uuid::new_v4();
        listings.seed(Listing {
            id: Uuid::new_v4(),
            seller_id: owner,
            title: "Legacy row".to_string(),
            description: None,
            brand: None,
            cylinder_size: CylinderSize::Kg13,
            price: 2800.0,
            quantity: 1,
            is_refill: false,
            location: None,
            images: ImageSet::default(),
            image_url: Some(image_url("legacy")),
            status: ListingStatus::Available,
            created_at: Utc::now(),
        });
        let id = listings.rows.lock().unwrap()[0].id;

        let report = manager.delete(owner, id).await.expect("delete");
        assert_eq!(report.images_total, 1);
        assert_eq!(report.images_removed, 1);
        assert_eq!(objects.remove_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pdf_upload_fails_with_zero_storage_calls() {
        let (manager, _, objects) = manager();
        let err = manager
            .upload_image(
                Uuid::new_v4(),
                ImageUpload {
                    bytes: vec![0u8; 128],
                    mime: "application/pdf".to_string(),
                },
            )
            .await
            .expect_err("wrong type");
        assert_eq!(err.kind(), MarketErrorKind::Validation);
        assert!(err.fields().is_some_and(|f| f.contains_key("file")));
        assert_eq!(objects.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversize_upload_fails_with_zero_storage_calls() {
        let (manager, _, objects) = manager();
        let err = manager
            .upload_image(
                Uuid::new_v4(),
                ImageUpload {
                    bytes: vec![0u8; MAX_IMAGE_BYTES + 1],
                    mime: "image/png".to_string(),
                },
            )
            .await
            .expect_err("too large");
        assert_eq!(err.kind(), MarketErrorKind::Capacity);
        assert_eq!(objects.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upload_namespaces_path_by_owner_and_keeps_extension() {
        let (manager, _, objects) = manager();
        let owner = Uuid::new_v4();
        let url = manager
            .upload_image(
                owner,
                ImageUpload {
                    bytes: vec![0u8; 512],
                    mime: "image/webp".to_string(),
                },
            )
            .await
            .expect("upload");
        assert!(url.contains(&format!("/{owner}/")));
        assert!(url.ends_with(".webp"));
        assert_eq!(objects.upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn foreign_url_removal_skips_the_remote_delete() {
        let (manager, _, objects) = manager();
        let removal = manager
            .remove_image("https://cdn.elsewhere.com/pic.jpg")
            .await;
        assert!(!removal.remote_removed);
        assert_eq!(objects.remove_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn toggle_flips_between_available_and_sold_only() {
        let (manager, listings, _) = manager();
        let owner = Uuid::new_v4();
        listings.grant(owner, &[Role::Station]);
        let created = manager
            .create(owner, &valid_raw(), vec![])
            .await
            .expect("create");

        let sold = manager.toggle_status(owner, created.id).await.expect("sold");
        assert_eq!(sold.status, ListingStatus::Sold);
        let back = manager
            .toggle_status(owner, created.id)
            .await
            .expect("available again");
        assert_eq!(back.status, ListingStatus::Available);

        listings.rows.lock().unwrap()[0].status = ListingStatus::Reserved;
        let err = manager
            .toggle_status(owner, created.id)
            .await
            .expect_err("reserved is off-limits");
        assert_eq!(err.kind(), MarketErrorKind::Conflict);
    }

    #[tokio::test]
    async fn update_by_non_owner_issues_no_store_update() {
        let (manager, listings, _) = manager();
        let owner = Uuid::new_v4();
        listings.grant(owner, &[Role::Seller]);
        let created = manager
            .create(owner, &valid_raw(), vec![])
            .await
            .expect("create");

        let err = manager
            .update(Uuid::new_v4(), created.id, &valid_raw(), vec![])
            .await
            .expect_err("not the owner");
        assert_eq!(err.kind(), MarketErrorKind::Permission);
        assert_eq!(listings.update_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn update_replaces_images_and_rederives_the_legacy_field() {
        let (manager, listings, _) = manager();
        let owner = Uuid::new_v4();
        listings.grant(owner, &[Role::Seller]);
        let created = manager
            .create(owner, &valid_raw(), vec![image_url("old")])
            .await
            .expect("create");

        let new_images = vec![image_url("x"), image_url("y")];
        let updated = manager
            .update(owner, created.id, &valid_raw(), new_images.clone())
            .await
            .expect("update");
        assert_eq!(updated.images.urls(), new_images.as_slice());
        assert_eq!(updated.image_url.as_deref(), Some(new_images[0].as_str()));

        let cleared = manager
            .update(owner, created.id, &valid_raw(), vec![])
            .await
            .expect("clear images");
        assert!(cleared.images.is_empty());
        assert_eq!(cleared.image_url, None);
    }

    #[tokio::test]
    async fn add_image_appends_until_the_cap() {
        let (manager, listings, _) = manager();
        let owner = Uuid::new_v4();
        listings.grant(owner, &[Role::Seller]);
        let images = (0..4).map(|n| image_url(&n.to_string())).collect();
        let created = manager
            .create(owner, &valid_raw(), images)
            .await
            .expect("create");

        let updated = manager
            .add_image(owner, created.id, image_url("fifth"))
            .await
            .expect("room for one more");
        assert_eq!(updated.images.len(), 5);
        assert_eq!(updated.image_url.as_deref(), Some(image_url("0").as_str()));

        let updates_so_far = listings.update_calls.load(Ordering::SeqCst);
        let err = manager
            .add_image(owner, created.id, image_url("sixth"))
            .await
            .expect_err("cap reached");
        assert_eq!(err.kind(), MarketErrorKind::Capacity);
        assert_eq!(listings.update_calls.load(Ordering::SeqCst), updates_so_far);
    }

    #[tokio::test]
    async fn removing_the_first_image_promotes_the_next() {
        let (manager, listings, objects) = manager();
        let owner = Uuid::new_v4();
        listings.grant(owner, &[Role::Seller]);
        let images = vec![image_url("a"), image_url("b"), image_url("c")];
        let created = manager
            .create(owner, &valid_raw(), images)
            .await
            .expect("create");

        let updated = manager
            .remove_image_at(owner, created.id, 0)
            .await
            .expect("remove first");
        assert_eq!(
            updated.images.urls(),
            [image_url("b"), image_url("c")].as_slice()
        );
        assert_eq!(updated.image_url.as_deref(), Some(image_url("b").as_str()));
        assert_eq!(objects.remove_calls.load(Ordering::SeqCst), 1);

        let err = manager
            .remove_image_at(owner, created.id, 9)
            .await
            .expect_err("out of range");
        assert_eq!(err.kind(), MarketErrorKind::NotFound);
        assert_eq!(objects.remove_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn browse_filters_and_reports_the_fresh_ceiling() {
        let (manager, listings, _) = manager();
        let seller = Uuid::new_v4();
        listings.grant(seller, &[Role::Seller]);
        let mut cheap = valid_raw();
        cheap.price = "800".to_string();
        cheap.title = "6kg Refill".to_string();
        cheap.is_refill = true;
        let mut dear = valid_raw();
        dear.price = "4500".to_string();
        dear.title = "22kg Gas Cylinder".to_string();
        dear.cylinder_size = "22kg".to_string();
        manager.create(seller, &cheap, vec![]).await.expect("cheap");
        manager.create(seller, &dear, vec![]).await.expect("dear");

        let page = manager
            .browse(&ListingQuery {
                search: "refill".to_string(),
                ..ListingQuery::unfiltered()
            })
            .await
            .expect("browse");
        assert_eq!(page.total, 1);
        assert_eq!(page.listings[0].title, "6kg Refill");
        // Ceiling derives from the whole fetch, not the filtered subset.
        assert_eq!(page.price_ceiling, 5000.0);
    }

    #[tokio::test]
    async fn profile_edit_writes_the_callers_own_row() {
        let (manager, listings, _) = manager();
        let user = Uuid::new_v4();
        listings.profiles.lock().unwrap().insert(
            user,
            Profile {
                user_id: user,
                full_name: None,
                phone: None,
                avatar_url: None,
            },
        );

        let updated = manager
            .update_profile(
                user,
                &RawProfileInput {
                    full_name: "  Jane Wanjiru ".to_string(),
                    phone: "0712 345 678".to_string(),
                },
            )
            .await
            .expect("update own profile");
        assert_eq!(updated.full_name.as_deref(), Some("Jane Wanjiru"));
        assert_eq!(updated.whatsapp_phone().as_deref(), Some("254712345678"));

        let detail = manager.profile(user).await.expect("readable back");
        assert_eq!(detail.phone.as_deref(), Some("0712 345 678"));
    }

    #[tokio::test]
    async fn invalid_profile_input_issues_no_store_write() {
        let (manager, listings, _) = manager();
        let err = manager
            .update_profile(
                Uuid::new_v4(),
                &RawProfileInput {
                    full_name: String::new(),
                    phone: "call me maybe".to_string(),
                },
            )
            .await
            .expect_err("bad phone");
        assert_eq!(err.kind(), MarketErrorKind::Validation);
        assert!(err.fields().is_some_and(|f| f.contains_key("phone")));
        assert_eq!(listings.profile_update_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dashboard_stats_count_active_rows_and_stock_value() {
        let (manager, listings, _) = manager();
        let seller = Uuid::new_v4();
        listings.grant(seller, &[Role::Seller]);
        let created = manager
            .create(seller, &valid_raw(), vec![])
            .await
            .expect("create");
        manager
            .toggle_status(seller, created.id)
            .await
            .expect("mark sold");
        manager
            .create(seller, &valid_raw(), vec![])
            .await
            .expect("second");

        let page = manager.dashboard(seller).await.expect("dashboard");
        assert_eq!(page.stats.total_listings, 2);
        assert_eq!(page.stats.active_listings, 1);
        assert_eq!(page.stats.stock_value, 2.0 * 1200.50 * 3.0);
    }
}
