use async_trait::async_trait;

use crate::domain::shop::ShopDomain;
use crate::domain::variant::{CatalogVariant, ProductId, VariantId};
use crate::errors::CatalogError;

/// Sibling variants found through a product's primary collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionSiblings {
    pub product_id: ProductId,
    pub collection_id: String,
    pub variant_ids: Vec<VariantId>,
}

/// Read-only, shop-scoped view of the storefront catalog.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Resolves `handle` to its product, takes the product's first collection
    /// and returns variant ids of up to `max_products` products of that
    /// collection, the current product excluded, `variants_per_product` each.
    ///
    /// `Ok(None)` means the product or its collection does not exist.
    async fn collection_siblings(
        &self,
        shop: &ShopDomain,
        handle: &str,
        max_products: usize,
        variants_per_product: usize,
    ) -> Result<Option<CollectionSiblings>, CatalogError>;

    /// Batch lookup. Unknown ids are skipped; returned order follows `ids`.
    async fn variants_by_ids(
        &self,
        shop: &ShopDomain,
        ids: &[VariantId],
    ) -> Result<Vec<CatalogVariant>, CatalogError>;
}
