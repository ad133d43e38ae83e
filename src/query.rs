//! Pure, in-memory filter/sort composition over a fetched listing page.
//! Safe to re-run on every keystroke; no I/O, no state.

use serde::Deserialize;

use crate::models::{CylinderSize, Listing};

/// Fallback browse ceiling when no listings exist to derive one from.
pub const DEFAULT_PRICE_CEILING: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeFilter {
    #[default]
    All,
    Full,
    Refill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SortKey {
    #[default]
    #[serde(rename = "newest")]
    Newest,
    #[serde(rename = "price-low")]
    PriceLow,
    #[serde(rename = "price-high")]
    PriceHigh,
}

#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    /// Case-insensitive substring, matched against title, brand and location.
    pub search: String,
    /// `None` means "all sizes".
    pub size: Option<CylinderSize>,
    pub kind: TypeFilter,
    /// Inclusive bounds.
    pub min_price: f64,
    pub max_price: f64,
    pub sort: SortKey,
}

impl ListingQuery {
    /// A query that passes everything, ordered newest first.
    pub fn unfiltered() -> Self {
        Self {
            max_price: f64::MAX,
            ..Self::default()
        }
    }

    pub fn matches(&self, listing: &Listing) -> bool {
        self.matches_search(listing)
            && self.size.is_none_or(|size| listing.cylinder_size == size)
            && self.matches_kind(listing)
            && listing.price >= self.min_price
            && listing.price <= self.max_price
    }

    fn matches_search(&self, listing: &Listing) -> bool {
        if self.search.is_empty() {
            return true;
        }
        let needle = self.search.to_lowercase();
        let hit = |field: Option<&str>| {
            field
                .unwrap_or_default()
                .to_lowercase()
                .contains(&needle)
        };
        hit(Some(&listing.title))
            || hit(listing.brand.as_deref())
            || hit(listing.location.as_deref())
    }

    fn matches_kind(&self, listing: &Listing) -> bool {
        match self.kind {
            TypeFilter::All => true,
            TypeFilter::Full => !listing.is_refill,
            TypeFilter::Refill => listing.is_refill,
        }
    }

    /// Filters with all predicates ANDed, then sorts. Sorting is stable, so
    /// equal keys keep their fetched (newest-first) relative order.
    pub fn apply(&self, records: &[Listing]) -> Vec<Listing> {
        let mut visible: Vec<Listing> = records
            .iter()
            .filter(|listing| self.matches(listing))
            .cloned()
            .collect();
        match self.sort {
            SortKey::Newest => visible.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortKey::PriceLow => visible.sort_by(|a, b| a.price.total_cmp(&b.price)),
            SortKey::PriceHigh => visible.sort_by(|a, b| b.price.total_cmp(&a.price)),
        }
        visible
    }
}

/// Upper slider bound for a fresh fetch: the max observed price rounded up to
/// the next thousand. Rounding up guarantees the listing that defines the
/// maximum is never excluded by its own bound.
pub fn price_ceiling(records: &[Listing]) -> f64 {
    let max = records
        .iter()
        .map(|listing| listing.price)
        .fold(f64::NAN, f64::max);
    if max.is_nan() {
        return DEFAULT_PRICE_CEILING;
    }
    (max / 1000.0).ceil() * 1000.0
}
