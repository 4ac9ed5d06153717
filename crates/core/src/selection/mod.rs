//! Recommendation selection.
//!
//! Candidate ids flow through dedupe → exclude current → shuffle → cap →
//! fallback top-up ([`build_candidate_pool`]), then a single catalog batch
//! lookup, availability filters and truncation ([`SelectionEngine`]).

mod engine;
mod pool;
mod service;

use serde::{Deserialize, Serialize};

use crate::domain::shop::{ShopDomain, UpsellMode};
use crate::domain::variant::{ReasonKey, VariantCard, VariantId};

pub use engine::SelectionEngine;
pub use pool::build_candidate_pool;
pub use service::RecommendationService;

pub const DEFAULT_OVERFETCH_FACTOR: usize = 10;
pub const DEFAULT_POOL_CEILING: usize = 50;
pub const DEFAULT_COLLECTION_PRODUCTS: usize = 10;
pub const DEFAULT_VARIANTS_PER_PRODUCT: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub overfetch_factor: usize,
    pub pool_ceiling: usize,
    pub collection_products: usize,
    pub variants_per_product: usize,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
            pool_ceiling: DEFAULT_POOL_CEILING,
            collection_products: DEFAULT_COLLECTION_PRODUCTS,
            variants_per_product: DEFAULT_VARIANTS_PER_PRODUCT,
        }
    }
}

impl SelectionPolicy {
    /// `min(limit * overfetch_factor, pool_ceiling)`.
    pub fn pool_target(&self, limit: usize) -> usize {
        limit.saturating_mul(self.overfetch_factor).min(self.pool_ceiling)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecommendationRequest {
    pub shop: ShopDomain,
    pub current_variant_id: Option<VariantId>,
    pub product_handle: Option<String>,
    pub requested_limit: Option<i64>,
}

impl RecommendationRequest {
    pub fn new(shop: ShopDomain) -> Self {
        Self { shop, current_variant_id: None, product_handle: None, requested_limit: None }
    }

    pub fn with_current_variant(mut self, id: impl Into<String>) -> Self {
        self.current_variant_id = Some(VariantId::from_gid(&id.into()));
        self
    }

    pub fn with_product_handle(mut self, handle: impl Into<String>) -> Self {
        self.product_handle = Some(handle.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.requested_limit = Some(limit);
        self
    }

    fn handle(&self) -> Option<&str> {
        self.product_handle.as_deref().map(str::trim).filter(|handle| !handle.is_empty())
    }
}

/// Where the candidate ids of a response came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Manual,
    Collection,
    Fallback,
    NoManualConfig,
    NoFallbackConfig,
    Empty,
}

impl SelectionSource {
    pub fn reason_key(&self) -> ReasonKey {
        match self {
            Self::Manual => ReasonKey::Handpicked,
            Self::Collection => ReasonKey::SameCollection,
            _ => ReasonKey::StorePicks,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionMeta {
    pub mode: UpsellMode,
    pub limit: usize,
    pub source: SelectionSource,
    pub used_candidates: usize,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub items: Vec<VariantCard>,
    pub meta: SelectionMeta,
}

impl Selection {
    fn empty(mode: UpsellMode, limit: usize, source: SelectionSource) -> Self {
        Self {
            items: Vec::new(),
            meta: SelectionMeta { mode, limit, source, used_candidates: 0, error: None },
        }
    }
}
