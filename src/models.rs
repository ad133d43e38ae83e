use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MarketError;

/// Upper bound on the ordered image sequence of one listing.
pub const MAX_LISTING_IMAGES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CylinderSize {
    #[serde(rename = "3kg")]
    Kg3,
    #[serde(rename = "6kg")]
    Kg6,
    #[serde(rename = "13kg")]
    Kg13,
    #[serde(rename = "22kg")]
    Kg22,
    #[serde(rename = "45kg")]
    Kg45,
}

impl CylinderSize {
    pub const ALL: [CylinderSize; 5] = [
        CylinderSize::Kg3,
        CylinderSize::Kg6,
        CylinderSize::Kg13,
        CylinderSize::Kg22,
        CylinderSize::Kg45,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CylinderSize::Kg3 => "3kg",
            CylinderSize::Kg6 => "6kg",
            CylinderSize::Kg13 => "13kg",
            CylinderSize::Kg22 => "22kg",
            CylinderSize::Kg45 => "45kg",
        }
    }

    pub fn from_label(input: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|size| size.label() == input.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    #[default]
    Available,
    Reserved,
    Sold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
    Station,
    Admin,
}

impl Role {
    pub fn from_label(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "buyer" => Some(Role::Buyer),
            "seller" => Some(Role::Seller),
            "station" => Some(Role::Station),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Roles allowed to create listings.
    pub fn can_sell(&self) -> bool {
        matches!(self, Role::Seller | Role::Station | Role::Admin)
    }
}

/// Ordered image URLs, capped at [`MAX_LISTING_IMAGES`]. The first element is
/// the display image; there is no separate "main" marker to keep in sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageSet(Vec<String>);

impl ImageSet {
    pub fn new(urls: Vec<String>) -> Result<Self, MarketError> {
        if urls.len() > MAX_LISTING_IMAGES {
            return Err(MarketError::capacity(
                "image_set",
                format!("at most {MAX_LISTING_IMAGES} images per listing"),
            ));
        }
        Ok(Self(urls))
    }

    pub fn push(&mut self, url: String) -> Result<(), MarketError> {
        if self.0.len() >= MAX_LISTING_IMAGES {
            return Err(MarketError::capacity(
                "image_set",
                format!("at most {MAX_LISTING_IMAGES} images per listing"),
            ));
        }
        self.0.push(url);
        Ok(())
    }

    /// Splices out the URL at `index`, preserving relative order of the rest.
    pub fn remove(&mut self, index: usize) -> Option<String> {
        if index < self.0.len() {
            Some(self.0.remove(index))
        } else {
            None
        }
    }

    /// The display image, by convention the first element.
    pub fn primary(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn urls(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    pub cylinder_size: CylinderSize,
    pub price: f64,
    pub quantity: i32,
    pub is_refill: bool,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub images: ImageSet,
    /// Legacy single-image column kept for older readers; always the first
    /// element of `images`, or null when the sequence is empty.
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Display image with the legacy fallback applied.
    pub fn display_image(&self) -> Option<&str> {
        self.images.primary().or(self.image_url.as_deref())
    }
}

/// Fields of a listing row to insert, owner and status included.
#[derive(Debug, Clone, Serialize)]
pub struct NewListing {
    pub seller_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub cylinder_size: CylinderSize,
    pub price: f64,
    pub quantity: i32,
    pub is_refill: bool,
    pub location: Option<String>,
    pub images: ImageSet,
    pub image_url: Option<String>,
    pub status: ListingStatus,
}

/// Partial update; `None` fields are left untouched by the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListingPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cylinder_size: Option<CylinderSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_refill: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<ImageSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ListingStatus>,
}

/// Self-service profile update; both columns are nullable and written
/// wholesale, so a `None` clears the stored value.
#[derive(Debug, Clone, Serialize)]
pub struct ProfilePatch {
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Profile {
    /// Phone digits normalized for Kenyan WhatsApp links: `07xx...` becomes
    /// `2547xx...`, bare nine-digit numbers get the country code prepended.
    pub fn whatsapp_phone(&self) -> Option<String> {
        let raw = self.phone.as_deref()?;
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return None;
        }
        if let Some(rest) = digits.strip_prefix('0') {
            Some(format!("254{rest}"))
        } else if !digits.starts_with("254") && digits.len() == 9 {
            Some(format!("254{digits}"))
        } else {
            Some(digits)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<crate::error::FieldErrors>,
}
