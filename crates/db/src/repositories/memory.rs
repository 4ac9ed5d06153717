use std::collections::HashMap;

use tokio::sync::RwLock;

use ravenrock_core::catalog::{CollectionSiblings, ProductCatalog};
use ravenrock_core::domain::shop::{ShopDomain, ShopSettings};
use ravenrock_core::domain::variant::{CatalogProduct, CatalogVariant, ProductId, VariantId};
use ravenrock_core::errors::{CatalogError, StoreError};
use ravenrock_core::quota::{SwapOutcome, UsageSnapshot, UsageStore};
use ravenrock_core::settings::SettingsStore;

use super::catalog::{CatalogSnapshot, SnapshotProduct};

#[derive(Default)]
pub struct InMemoryShopSettingsRepository {
    shops: RwLock<HashMap<String, ShopSettings>>,
}

#[async_trait::async_trait]
impl SettingsStore for InMemoryShopSettingsRepository {
    async fn load_or_create(&self, shop: &ShopDomain) -> Result<ShopSettings, StoreError> {
        if let Some(settings) = self.shops.read().await.get(shop.as_str()) {
            return Ok(settings.clone());
        }
        let mut shops = self.shops.write().await;
        Ok(shops
            .entry(shop.0.clone())
            .or_insert_with(|| ShopSettings::defaults_for(shop.clone()))
            .clone())
    }

    async fn save(&self, settings: &ShopSettings) -> Result<(), StoreError> {
        let mut shops = self.shops.write().await;
        let mut next = settings.clone();
        if let Some(existing) = shops.get(settings.shop.as_str()) {
            next.ai_calls_this_month = existing.ai_calls_this_month;
            next.ai_usage_month = existing.ai_usage_month.clone();
        } else {
            next.ai_calls_this_month = 0;
            next.ai_usage_month = None;
        }
        shops.insert(settings.shop.0.clone(), next);
        Ok(())
    }
}

#[async_trait::async_trait]
impl UsageStore for InMemoryShopSettingsRepository {
    async fn load_usage(&self, shop: &ShopDomain) -> Result<UsageSnapshot, StoreError> {
        self.shops
            .read()
            .await
            .get(shop.as_str())
            .map(UsageSnapshot::from_settings)
            .ok_or_else(|| StoreError::Persistence(format!("no settings row for `{shop}`")))
    }

    async fn compare_and_swap(
        &self,
        shop: &ShopDomain,
        expected: &UsageSnapshot,
        next: &UsageSnapshot,
    ) -> Result<SwapOutcome, StoreError> {
        let mut shops = self.shops.write().await;
        let row = shops
            .get_mut(shop.as_str())
            .ok_or_else(|| StoreError::Persistence(format!("no settings row for `{shop}`")))?;

        if row.ai_calls_this_month != expected.calls || row.ai_usage_month != expected.month {
            return Ok(SwapOutcome::Conflict(UsageSnapshot::from_settings(row)));
        }
        row.ai_calls_this_month = next.calls;
        row.ai_usage_month = next.month.clone();
        Ok(SwapOutcome::Applied)
    }
}

#[derive(Default)]
pub struct InMemoryProductCatalog {
    shops: RwLock<HashMap<String, CatalogSnapshot>>,
}

impl InMemoryProductCatalog {
    pub async fn import(&self, shop: &ShopDomain, snapshot: CatalogSnapshot) {
        self.shops.write().await.insert(shop.0.clone(), snapshot);
    }
}

fn bare(raw: &str) -> String {
    VariantId::from_gid(raw).0
}

fn to_catalog_variant(product: &SnapshotProduct, index: usize) -> Option<CatalogVariant> {
    let variant = product.variants.get(index)?;
    Some(CatalogVariant {
        id: VariantId::from_gid(&variant.id),
        title: variant.title.clone(),
        price: variant.price.clone(),
        available_for_sale: variant.available_for_sale,
        inventory_tracked: variant.inventory_tracked,
        inventory_quantity: variant.inventory_quantity,
        image_url: variant.image_url.clone(),
        product: CatalogProduct {
            id: ProductId(bare(&product.id)),
            handle: product.handle.clone(),
            title: product.title.clone(),
            is_gift_card: product.is_gift_card,
            featured_image_url: product.featured_image_url.clone(),
        },
    })
}

#[async_trait::async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn collection_siblings(
        &self,
        shop: &ShopDomain,
        handle: &str,
        max_products: usize,
        variants_per_product: usize,
    ) -> Result<Option<CollectionSiblings>, CatalogError> {
        let shops = self.shops.read().await;
        let Some(snapshot) = shops.get(shop.as_str()) else {
            return Ok(None);
        };
        let Some(product) = snapshot.products.iter().find(|product| product.handle == handle)
        else {
            return Ok(None);
        };
        let product_id = bare(&product.id);
        let Some(collection_id) = snapshot.collections_of(&product_id).into_iter().next() else {
            return Ok(None);
        };
        let Some(collection) =
            snapshot.collections.iter().find(|collection| bare(&collection.id) == collection_id)
        else {
            return Ok(None);
        };

        let variant_ids = collection
            .product_ids
            .iter()
            .take(max_products)
            .map(|id| bare(id))
            .filter(|id| *id != product_id)
            .filter_map(|id| snapshot.products.iter().find(|product| bare(&product.id) == id))
            .flat_map(|member| {
                member
                    .variants
                    .iter()
                    .take(variants_per_product)
                    .map(|variant| VariantId::from_gid(&variant.id))
            })
            .collect();

        Ok(Some(CollectionSiblings { product_id: ProductId(product_id), collection_id, variant_ids }))
    }

    async fn variants_by_ids(
        &self,
        shop: &ShopDomain,
        ids: &[VariantId],
    ) -> Result<Vec<CatalogVariant>, CatalogError> {
        let shops = self.shops.read().await;
        let Some(snapshot) = shops.get(shop.as_str()) else {
            return Ok(Vec::new());
        };

        let mut by_id: HashMap<String, CatalogVariant> = HashMap::new();
        for product in &snapshot.products {
            for index in 0..product.variants.len() {
                if let Some(variant) = to_catalog_variant(product, index) {
                    by_id.insert(variant.id.0.clone(), variant);
                }
            }
        }

        Ok(ids.iter().filter_map(|id| by_id.remove(id.as_str())).collect())
    }
}
