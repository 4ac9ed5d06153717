use serde::{Deserialize, Serialize};

const DEFAULT_VARIANT_TITLE: &str = "Default Title";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(pub String);

impl VariantId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts either a bare id (`"4291"`) or a platform global id
    /// (`"gid://shopify/ProductVariant/4291"`) and keeps the trailing segment.
    pub fn from_gid(value: &str) -> Self {
        let trimmed = value.trim();
        let tail = trimmed.rsplit('/').next().unwrap_or(trimmed);
        Self(tail.to_string())
    }

    /// Parses a merchant-entered list separated by commas or whitespace.
    /// Blank entries are dropped; order is kept.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split(|ch: char| ch == ',' || ch.is_whitespace())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(Self::from_gid)
            .collect()
    }
}

impl std::fmt::Display for VariantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: ProductId,
    pub handle: String,
    pub title: String,
    pub is_gift_card: bool,
    pub featured_image_url: Option<String>,
}

/// A variant as resolved by the product catalog, before filtering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogVariant {
    pub id: VariantId,
    pub title: String,
    pub price: String,
    pub available_for_sale: bool,
    pub inventory_tracked: bool,
    pub inventory_quantity: Option<i64>,
    pub image_url: Option<String>,
    pub product: CatalogProduct,
}

impl CatalogVariant {
    /// Not purchasable, or tracked stock at or below zero.
    pub fn is_sold_out(&self) -> bool {
        !self.available_for_sale
            || (self.inventory_tracked && self.inventory_quantity.unwrap_or(0) <= 0)
    }

    pub fn display_title(&self) -> String {
        let variant_title = self.title.trim();
        let product_title = self.product.title.trim();
        if variant_title.is_empty() || variant_title == DEFAULT_VARIANT_TITLE {
            return product_title.to_string();
        }
        format!("{product_title} — {variant_title}").trim().to_string()
    }

    pub fn display_image(&self) -> Option<String> {
        self.image_url.clone().or_else(|| self.product.featured_image_url.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKey {
    Handpicked,
    SameCollection,
    StorePicks,
}

impl ReasonKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handpicked => "handpicked",
            Self::SameCollection => "same_collection",
            Self::StorePicks => "store_picks",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCard {
    pub id: VariantId,
    pub title: String,
    pub price: String,
    pub image_url: Option<String>,
    pub available: bool,
    pub is_gift_card: bool,
    pub reason_key: ReasonKey,
}

impl VariantCard {
    pub fn from_catalog(variant: &CatalogVariant, reason_key: ReasonKey) -> Self {
        Self {
            id: variant.id.clone(),
            title: variant.display_title(),
            price: variant.price.clone(),
            image_url: variant.display_image(),
            available: !variant.is_sold_out(),
            is_gift_card: variant.product.is_gift_card,
            reason_key,
        }
    }
}
