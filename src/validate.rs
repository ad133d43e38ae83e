//! Form-input validation. Raw text fields come in as the user typed them;
//! the output is either a fully normalized record ready to persist or a map
//! of one human-readable message per offending field.

use serde::Deserialize;

use crate::error::FieldErrors;
use crate::models::{CylinderSize, Role};

pub const TITLE_MIN: usize = 3;
pub const TITLE_MAX: usize = 100;
pub const DESCRIPTION_MAX: usize = 500;
pub const BRAND_MAX: usize = 50;
pub const LOCATION_MAX: usize = 100;
pub const PRICE_MAX: f64 = 1_000_000.0;
pub const QUANTITY_MAX: i32 = 1000;
pub const PASSWORD_MIN: usize = 6;
pub const NAME_MAX: usize = 100;
pub const PHONE_MAX: usize = 20;

/// Listing form fields as submitted; numeric fields arrive as text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawListingInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub cylinder_size: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub is_refill: bool,
    #[serde(default)]
    pub location: String,
}

/// Normalized listing fields, trimmed and coerced, ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedListing {
    pub title: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub cylinder_size: CylinderSize,
    pub price: f64,
    pub quantity: i32,
    pub is_refill: bool,
    pub location: Option<String>,
}

pub fn listing(raw: &RawListingInput) -> Result<ValidatedListing, FieldErrors> {
    let mut errors = FieldErrors::new();

    let title = raw.title.trim().to_string();
    if title.chars().count() < TITLE_MIN {
        errors.insert("title", format!("Title must be at least {TITLE_MIN} characters"));
    } else if title.chars().count() > TITLE_MAX {
        errors.insert("title", format!("Title must be less than {TITLE_MAX} characters"));
    }

    let description = optional(&raw.description);
    if description.as_ref().is_some_and(|d| d.chars().count() > DESCRIPTION_MAX) {
        errors.insert(
            "description",
            format!("Description must be less than {DESCRIPTION_MAX} characters"),
        );
    }

    let brand = optional(&raw.brand);
    if brand.as_ref().is_some_and(|b| b.chars().count() > BRAND_MAX) {
        errors.insert("brand", format!("Brand must be less than {BRAND_MAX} characters"));
    }

    let cylinder_size = match CylinderSize::from_label(&raw.cylinder_size) {
        Some(size) => Some(size),
        None => {
            errors.insert("cylinder_size", "Please select a cylinder size".to_string());
            None
        }
    };

    // Unparseable text coerces to 0, which then fails the positivity check
    // with the same message the user would get for an explicit zero.
    let price = raw.price.trim().parse::<f64>().unwrap_or(0.0);
    if !(price > 0.0) {
        errors.insert("price", "Price must be greater than 0".to_string());
    } else if price > PRICE_MAX {
        errors.insert("price", "Price is too high".to_string());
    }

    // Non-numeric text coerces to the single-item default, not an error.
    let quantity = raw.quantity.trim().parse::<i32>().unwrap_or(1);
    if quantity < 1 {
        errors.insert("quantity", "Quantity must be at least 1".to_string());
    } else if quantity > QUANTITY_MAX {
        errors.insert("quantity", "Quantity is too high".to_string());
    }

    let location = optional(&raw.location);
    if location.as_ref().is_some_and(|l| l.chars().count() > LOCATION_MAX) {
        errors.insert(
            "location",
            format!("Location must be less than {LOCATION_MAX} characters"),
        );
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidatedListing {
        title,
        description,
        brand,
        cylinder_size: cylinder_size.expect("checked above"),
        price,
        quantity,
        is_refill: raw.is_refill,
        location,
    })
}

fn optional(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Profile form fields as submitted by the account owner.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProfileInput {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedProfile {
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

pub fn profile(raw: &RawProfileInput) -> Result<ValidatedProfile, FieldErrors> {
    let mut errors = FieldErrors::new();

    let full_name = optional(&raw.full_name);
    if full_name.as_ref().is_some_and(|n| n.chars().count() > NAME_MAX) {
        errors.insert(
            "full_name",
            format!("Name must be less than {NAME_MAX} characters"),
        );
    }

    let phone = optional(&raw.phone);
    if let Some(p) = &phone
        && (p.chars().count() > PHONE_MAX
            || !p.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-')))
    {
        errors.insert("phone", "Please enter a valid phone number".to_string());
    }

    if errors.is_empty() {
        Ok(ValidatedProfile { full_name, phone })
    } else {
        Err(errors)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignInInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignUpInput {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
    pub role: String,
}

pub fn sign_in(input: &SignInInput) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    if !looks_like_email(&input.email) {
        errors.insert("email", "Please enter a valid email address".to_string());
    }
    if input.password.chars().count() < PASSWORD_MIN {
        errors.insert(
            "password",
            format!("Password must be at least {PASSWORD_MIN} characters"),
        );
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Validated registration; only self-assignable roles pass (admin is granted
/// out of band, never at sign-up).
pub fn sign_up(input: &SignUpInput) -> Result<Role, FieldErrors> {
    let mut errors = FieldErrors::new();
    if input.name.trim().chars().count() < 2 {
        errors.insert("name", "Name must be at least 2 characters".to_string());
    }
    if !looks_like_email(&input.email) {
        errors.insert("email", "Please enter a valid email address".to_string());
    }
    if input.password.chars().count() < PASSWORD_MIN {
        errors.insert(
            "password",
            format!("Password must be at least {PASSWORD_MIN} characters"),
        );
    }
    let role = match Role::from_label(&input.role) {
        Some(role) if role != Role::Admin => Some(role),
        _ => {
            errors.insert("role", "Please choose buyer, seller or station".to_string());
            None
        }
    };
    match role {
        Some(role) if errors.is_empty() => Ok(role),
        _ => Err(errors),
    }
}

fn looks_like_email(raw: &str) -> bool {
    let trimmed = raw.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}
