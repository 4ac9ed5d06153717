pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod proxy;
pub mod quota;
pub mod selection;
pub mod settings;

pub use catalog::{CollectionSiblings, ProductCatalog};
pub use domain::shop::{ShopDomain, ShopSettings, TriggerType, UpsellMode};
pub use domain::variant::{CatalogProduct, CatalogVariant, ProductId, ReasonKey, VariantCard, VariantId};
pub use errors::{ApplicationError, CatalogError, StoreError};
pub use proxy::{RecommendationResponse, WidgetConfigResponse, WidgetDefaults};
pub use quota::{QuotaDecision, QuotaTracker, SwapOutcome, UsageSnapshot, UsageStore};
pub use selection::{
    build_candidate_pool, RecommendationRequest, RecommendationService, Selection,
    SelectionEngine, SelectionPolicy, SelectionSource,
};
pub use settings::SettingsStore;
