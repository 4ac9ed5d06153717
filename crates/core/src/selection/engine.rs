use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};

use super::pool::build_candidate_pool;
use super::{RecommendationRequest, Selection, SelectionMeta, SelectionPolicy, SelectionSource};
use crate::catalog::ProductCatalog;
use crate::domain::shop::{ShopSettings, UpsellMode};
use crate::domain::variant::{CatalogVariant, VariantCard, VariantId};
use crate::errors::ApplicationError;

pub struct SelectionEngine {
    catalog: Arc<dyn ProductCatalog>,
    policy: SelectionPolicy,
}

impl SelectionEngine {
    pub fn new(catalog: Arc<dyn ProductCatalog>, policy: SelectionPolicy) -> Self {
        Self { catalog, policy }
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Selects up to `effective_limit` cards for `request`.
    ///
    /// `settings` must already carry the request-scoped mode (see
    /// [`crate::quota::QuotaDecision::request_mode`]). Catalog failures end
    /// in an empty selection with `meta.error` set, never in an `Err`.
    pub async fn select<R>(
        &self,
        request: &RecommendationRequest,
        settings: &ShopSettings,
        rng: &mut R,
    ) -> Selection
    where
        R: Rng + Send,
    {
        let limit = settings.effective_limit(request.requested_limit);
        let configured_mode = settings.upsell_mode;
        let handle = request.handle();

        if configured_mode == UpsellMode::Manual && settings.manual_variant_ids.is_empty() {
            return Selection::empty(configured_mode, limit, SelectionSource::NoManualConfig);
        }
        if configured_mode != UpsellMode::Manual
            && settings.fallback_variant_ids.is_empty()
            && handle.is_none()
        {
            return Selection::empty(configured_mode, limit, SelectionSource::NoFallbackConfig);
        }

        let (candidates, source) = if configured_mode == UpsellMode::Manual {
            (settings.manual_variant_ids.clone(), SelectionSource::Manual)
        } else {
            self.collection_candidates(request, settings, handle).await
        };
        let mode =
            if source == SelectionSource::Manual { UpsellMode::Manual } else { UpsellMode::Collection };

        let pool = build_candidate_pool(
            &candidates,
            request.current_variant_id.as_ref(),
            self.policy.pool_target(limit),
            &settings.fallback_variant_ids,
            rng,
        );

        let mut meta = SelectionMeta {
            mode,
            limit,
            source,
            used_candidates: candidates.len(),
            error: None,
        };

        if pool.is_empty() {
            meta.source = SelectionSource::Empty;
            return Selection { items: Vec::new(), meta };
        }

        let variants = match self.catalog.variants_by_ids(&request.shop, &pool).await {
            Ok(variants) => variants,
            Err(error) => {
                let error = ApplicationError::from(error);
                warn!(
                    event_name = "selection.catalog.lookup_failed",
                    shop = %request.shop,
                    pool_size = pool.len(),
                    error = %error,
                    "variant batch lookup failed; returning empty selection"
                );
                meta.error = Some(error.error_code().to_string());
                return Selection { items: Vec::new(), meta };
            }
        };

        let reason_key = source.reason_key();
        let current = request.current_variant_id.as_ref();
        let items: Vec<VariantCard> = variants
            .iter()
            .filter(|variant| Some(&variant.id) != current)
            .filter(|variant| passes_filters(variant, settings))
            .take(limit)
            .map(|variant| VariantCard::from_catalog(variant, reason_key))
            .collect();

        debug!(
            event_name = "selection.completed",
            shop = %request.shop,
            mode = mode.as_str(),
            pool_size = pool.len(),
            resolved = variants.len(),
            returned = items.len(),
            "selection completed"
        );

        Selection { items, meta }
    }

    async fn collection_candidates(
        &self,
        request: &RecommendationRequest,
        settings: &ShopSettings,
        handle: Option<&str>,
    ) -> (Vec<VariantId>, SelectionSource) {
        let fallback = (settings.fallback_variant_ids.clone(), SelectionSource::Fallback);
        let Some(handle) = handle else {
            return fallback;
        };

        match self
            .catalog
            .collection_siblings(
                &request.shop,
                handle,
                self.policy.collection_products,
                self.policy.variants_per_product,
            )
            .await
        {
            Ok(Some(siblings)) if !siblings.variant_ids.is_empty() => {
                (siblings.variant_ids, SelectionSource::Collection)
            }
            Ok(_) => fallback,
            Err(error) => {
                warn!(
                    event_name = "selection.catalog.collection_failed",
                    shop = %request.shop,
                    product_handle = handle,
                    error = %error,
                    "collection resolution failed; keeping fallback candidates"
                );
                fallback
            }
        }
    }
}

fn passes_filters(variant: &CatalogVariant, settings: &ShopSettings) -> bool {
    if settings.exclude_gift_cards && variant.product.is_gift_card {
        return false;
    }
    if settings.exclude_out_of_stock && variant.is_sold_out() {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::catalog::{CollectionSiblings, ProductCatalog};
    use crate::domain::shop::{ShopDomain, ShopSettings, UpsellMode};
    use crate::domain::variant::{CatalogProduct, CatalogVariant, ProductId, ReasonKey, VariantId};
    use crate::errors::CatalogError;
    use crate::selection::{RecommendationRequest, SelectionEngine, SelectionPolicy, SelectionSource};

    #[derive(Default)]
    struct StubCatalog {
        variants: HashMap<String, CatalogVariant>,
        collections: HashMap<String, Vec<String>>,
        fail_lookup: bool,
        fail_collection: bool,
        lookups: AtomicUsize,
        last_lookup_size: AtomicUsize,
    }

    impl StubCatalog {
        fn with_variant(mut self, id: &str, gift_card: bool, available: bool) -> Self {
            self.variants.insert(
                id.to_string(),
                CatalogVariant {
                    id: VariantId::new(id),
                    title: format!("Option {id}"),
                    price: "12.00".to_string(),
                    available_for_sale: available,
                    inventory_tracked: false,
                    inventory_quantity: None,
                    image_url: None,
                    product: CatalogProduct {
                        id: ProductId(format!("p-{id}")),
                        handle: format!("product-{id}"),
                        title: format!("Product {id}"),
                        is_gift_card: gift_card,
                        featured_image_url: None,
                    },
                },
            );
            self
        }

        fn with_collection(mut self, handle: &str, ids: &[&str]) -> Self {
            self.collections
                .insert(handle.to_string(), ids.iter().map(|id| id.to_string()).collect());
            self
        }
    }

    #[async_trait]
    impl ProductCatalog for StubCatalog {
        async fn collection_siblings(
            &self,
            _shop: &ShopDomain,
            handle: &str,
            _max_products: usize,
            _variants_per_product: usize,
        ) -> Result<Option<CollectionSiblings>, CatalogError> {
            if self.fail_collection {
                return Err(CatalogError::Timeout);
            }
            Ok(self.collections.get(handle).map(|ids| CollectionSiblings {
                product_id: ProductId(format!("p-{handle}")),
                collection_id: "col-1".to_string(),
                variant_ids: ids.iter().map(|id| VariantId::new(id.as_str())).collect(),
            }))
        }

        async fn variants_by_ids(
            &self,
            _shop: &ShopDomain,
            ids: &[VariantId],
        ) -> Result<Vec<CatalogVariant>, CatalogError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.last_lookup_size.store(ids.len(), Ordering::SeqCst);
            if self.fail_lookup {
                return Err(CatalogError::Unavailable("upstream 502".to_string()));
            }
            Ok(ids.iter().filter_map(|id| self.variants.get(id.as_str()).cloned()).collect())
        }
    }

    fn ids(values: &[&str]) -> Vec<VariantId> {
        values.iter().map(|value| VariantId::new(*value)).collect()
    }

    fn settings() -> ShopSettings {
        ShopSettings {
            exclude_gift_cards: false,
            exclude_out_of_stock: false,
            ..ShopSettings::defaults_for(ShopDomain::new("demo.myshopify.com"))
        }
    }

    fn request() -> RecommendationRequest {
        RecommendationRequest::new(ShopDomain::new("demo.myshopify.com"))
    }

    fn engine(catalog: StubCatalog) -> (SelectionEngine, Arc<StubCatalog>) {
        let catalog = Arc::new(catalog);
        (SelectionEngine::new(catalog.clone(), SelectionPolicy::default()), catalog)
    }

    fn returned(selection: &crate::selection::Selection) -> HashSet<String> {
        selection.items.iter().map(|item| item.id.0.clone()).collect()
    }

    #[tokio::test]
    async fn manual_mode_excludes_current_variant() {
        let (engine, _) = engine(
            StubCatalog::default().with_variant("A", false, true).with_variant("B", false, true),
        );
        let settings = ShopSettings {
            upsell_mode: UpsellMode::Manual,
            manual_variant_ids: ids(&["A", "B"]),
            limit: 3,
            ..settings()
        };

        let selection = engine
            .select(&request().with_current_variant("A"), &settings, &mut StdRng::seed_from_u64(1))
            .await;

        assert_eq!(returned(&selection), HashSet::from(["B".to_string()]));
        assert!(selection.items.iter().all(|item| item.reason_key == ReasonKey::Handpicked));
        assert_eq!(selection.meta.mode, UpsellMode::Manual);
        assert_eq!(selection.meta.source, SelectionSource::Manual);
    }

    #[tokio::test]
    async fn collection_mode_without_handle_uses_store_picks() {
        let (engine, _) = engine(
            StubCatalog::default()
                .with_variant("X", false, true)
                .with_variant("Y", false, true)
                .with_variant("Z", false, true),
        );
        let settings = ShopSettings { fallback_variant_ids: ids(&["X", "Y", "Z"]), limit: 2, ..settings() };

        let selection = engine.select(&request(), &settings, &mut StdRng::seed_from_u64(5)).await;

        assert_eq!(selection.items.len(), 2);
        assert!(returned(&selection).is_subset(&HashSet::from([
            "X".to_string(),
            "Y".to_string(),
            "Z".to_string()
        ])));
        assert!(selection.items.iter().all(|item| item.reason_key == ReasonKey::StorePicks));
        assert_eq!(selection.meta.source, SelectionSource::Fallback);
    }

    #[tokio::test]
    async fn manual_mode_without_ids_returns_explicit_empty() {
        let (engine, catalog) = engine(StubCatalog::default().with_variant("X", false, true));
        let settings = ShopSettings {
            upsell_mode: UpsellMode::Manual,
            fallback_variant_ids: ids(&["X"]),
            ..settings()
        };

        let selection = engine.select(&request(), &settings, &mut StdRng::seed_from_u64(1)).await;

        assert!(selection.items.is_empty());
        assert_eq!(selection.meta.source, SelectionSource::NoManualConfig);
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn collection_mode_without_fallback_or_handle_returns_explicit_empty() {
        let (engine, _) = engine(StubCatalog::default());

        let selection = engine.select(&request(), &settings(), &mut StdRng::seed_from_u64(1)).await;

        assert!(selection.items.is_empty());
        assert_eq!(selection.meta.source, SelectionSource::NoFallbackConfig);
    }

    #[tokio::test]
    async fn collection_siblings_replace_fallback() {
        let (engine, _) = engine(
            StubCatalog::default()
                .with_variant("S1", false, true)
                .with_variant("S2", false, true)
                .with_variant("F1", false, true)
                .with_collection("wool-socks", &["S1", "S2"]),
        );
        let settings = ShopSettings { fallback_variant_ids: ids(&["F1"]), limit: 2, ..settings() };

        let selection = engine
            .select(
                &request().with_product_handle("wool-socks"),
                &settings,
                &mut StdRng::seed_from_u64(9),
            )
            .await;

        assert_eq!(returned(&selection), HashSet::from(["S1".to_string(), "S2".to_string()]));
        assert!(selection.items.iter().all(|item| item.reason_key == ReasonKey::SameCollection));
        assert_eq!(selection.meta.source, SelectionSource::Collection);
        assert_eq!(selection.meta.used_candidates, 2);
    }

    #[tokio::test]
    async fn collection_failure_keeps_fallback_candidates() {
        let catalog = StubCatalog { fail_collection: true, ..StubCatalog::default() }
            .with_variant("F1", false, true);
        let (engine, _) = engine(catalog);
        let settings = ShopSettings { fallback_variant_ids: ids(&["F1"]), ..settings() };

        let selection = engine
            .select(
                &request().with_product_handle("wool-socks"),
                &settings,
                &mut StdRng::seed_from_u64(9),
            )
            .await;

        assert_eq!(returned(&selection), HashSet::from(["F1".to_string()]));
        assert_eq!(selection.meta.source, SelectionSource::Fallback);
        assert!(selection.meta.error.is_none());
    }

    #[tokio::test]
    async fn filters_gift_cards_and_sold_out_variants() {
        let (engine, _) = engine(
            StubCatalog::default()
                .with_variant("GIFT", true, true)
                .with_variant("GONE", false, false)
                .with_variant("OK1", false, true)
                .with_variant("OK2", false, true),
        );
        let settings = ShopSettings {
            fallback_variant_ids: ids(&["GIFT", "GONE", "OK1", "OK2"]),
            exclude_gift_cards: true,
            exclude_out_of_stock: true,
            limit: 6,
            ..settings()
        };

        for seed in 0..20 {
            let selection =
                engine.select(&request(), &settings, &mut StdRng::seed_from_u64(seed)).await;
            assert_eq!(
                returned(&selection),
                HashSet::from(["OK1".to_string(), "OK2".to_string()])
            );
            assert!(selection.items.iter().all(|item| item.available && !item.is_gift_card));
        }
    }

    #[tokio::test]
    async fn lookup_failure_is_absorbed_into_meta() {
        let catalog = StubCatalog { fail_lookup: true, ..StubCatalog::default() };
        let (engine, _) = engine(catalog);
        let settings = ShopSettings { fallback_variant_ids: ids(&["F1", "F2"]), ..settings() };

        let selection = engine.select(&request(), &settings, &mut StdRng::seed_from_u64(2)).await;

        assert!(selection.items.is_empty());
        assert_eq!(selection.meta.error.as_deref(), Some("catalog_unavailable"));
    }

    #[tokio::test]
    async fn overfetches_once_and_respects_effective_limit() {
        let mut catalog = StubCatalog::default();
        let mut fallback = Vec::new();
        for index in 0..80 {
            let id = format!("V{index}");
            catalog = catalog.with_variant(&id, false, true);
            fallback.push(VariantId::new(id));
        }
        let (engine, catalog) = engine(catalog);
        let settings = ShopSettings { fallback_variant_ids: fallback, ..settings() };

        let selection = engine
            .select(
                &request().with_limit(40).with_current_variant("V3"),
                &settings,
                &mut StdRng::seed_from_u64(4),
            )
            .await;

        assert_eq!(selection.meta.limit, 6);
        assert_eq!(selection.items.len(), 6);
        assert!(!returned(&selection).contains("V3"));
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.last_lookup_size.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn empty_pool_skips_catalog() {
        let (engine, catalog) = engine(StubCatalog::default());
        let settings = ShopSettings { fallback_variant_ids: ids(&["ONLY"]), ..settings() };

        let selection = engine
            .select(&request().with_current_variant("ONLY"), &settings, &mut StdRng::seed_from_u64(1))
            .await;

        assert!(selection.items.is_empty());
        assert_eq!(selection.meta.source, SelectionSource::Empty);
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 0);
    }
}
