//! Local mirror of the storefront catalog.
//!
//! Rows are scoped by shop and replaced wholesale by [`SqlProductCatalog::import`].
//! Ids are stored without their `gid://` prefix.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};
use tracing::info;

use ravenrock_core::catalog::{CollectionSiblings, ProductCatalog};
use ravenrock_core::domain::shop::ShopDomain;
use ravenrock_core::domain::variant::{CatalogProduct, CatalogVariant, ProductId, VariantId};
use ravenrock_core::errors::CatalogError;

use super::RepositoryError;
use crate::DbPool;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub products: Vec<SnapshotProduct>,
    #[serde(default)]
    pub collections: Vec<SnapshotCollection>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotProduct {
    pub id: String,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub is_gift_card: bool,
    #[serde(default)]
    pub featured_image_url: Option<String>,
    #[serde(default)]
    pub variants: Vec<SnapshotVariant>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotVariant {
    pub id: String,
    pub title: String,
    pub price: String,
    #[serde(default = "default_true")]
    pub available_for_sale: bool,
    #[serde(default)]
    pub inventory_tracked: bool,
    #[serde(default)]
    pub inventory_quantity: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Collection membership in listing order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCollection {
    pub id: String,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub product_ids: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub products: usize,
    pub variants: usize,
    pub collections: usize,
}

fn default_true() -> bool {
    true
}

fn bare_id(raw: &str) -> String {
    VariantId::from_gid(raw).0
}

impl CatalogSnapshot {
    /// Collection ids per product, in the order the product was first listed.
    pub fn collections_of(&self, product_id: &str) -> Vec<String> {
        self.collections
            .iter()
            .filter(|collection| {
                collection.product_ids.iter().any(|id| bare_id(id) == product_id)
            })
            .map(|collection| bare_id(&collection.id))
            .collect()
    }

    pub fn summary(&self) -> ImportSummary {
        ImportSummary {
            products: self.products.len(),
            variants: self.products.iter().map(|product| product.variants.len()).sum(),
            collections: self.collections.len(),
        }
    }
}

pub struct SqlProductCatalog {
    pool: DbPool,
}

impl SqlProductCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Replaces every catalog row of `shop` with `snapshot` in one transaction.
    pub async fn import(
        &self,
        shop: &ShopDomain,
        snapshot: &CatalogSnapshot,
    ) -> Result<ImportSummary, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for table in
            ["catalog_collection_product", "catalog_variant", "catalog_collection", "catalog_product"]
        {
            sqlx::query(&format!("DELETE FROM {table} WHERE shop = ?"))
                .bind(shop.as_str())
                .execute(&mut *tx)
                .await?;
        }

        for product in &snapshot.products {
            let product_id = bare_id(&product.id);
            sqlx::query(
                "INSERT INTO catalog_product (shop, id, handle, title, is_gift_card, featured_image_url)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(shop.as_str())
            .bind(&product_id)
            .bind(&product.handle)
            .bind(&product.title)
            .bind(product.is_gift_card)
            .bind(product.featured_image_url.as_deref())
            .execute(&mut *tx)
            .await?;

            for (position, variant) in product.variants.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO catalog_variant (
                        shop,
                        id,
                        product_id,
                        title,
                        price,
                        available_for_sale,
                        inventory_tracked,
                        inventory_quantity,
                        image_url,
                        position
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(shop.as_str())
                .bind(bare_id(&variant.id))
                .bind(&product_id)
                .bind(&variant.title)
                .bind(&variant.price)
                .bind(variant.available_for_sale)
                .bind(variant.inventory_tracked)
                .bind(variant.inventory_quantity)
                .bind(variant.image_url.as_deref())
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        let mut memberships: HashMap<String, i64> = HashMap::new();
        for collection in &snapshot.collections {
            let collection_id = bare_id(&collection.id);
            sqlx::query(
                "INSERT INTO catalog_collection (shop, id, handle, title) VALUES (?, ?, ?, ?)",
            )
            .bind(shop.as_str())
            .bind(&collection_id)
            .bind(&collection.handle)
            .bind(&collection.title)
            .execute(&mut *tx)
            .await?;

            for (product_position, raw_product_id) in collection.product_ids.iter().enumerate() {
                let product_id = bare_id(raw_product_id);
                let collection_position = memberships.entry(product_id.clone()).or_insert(0);
                sqlx::query(
                    "INSERT INTO catalog_collection_product (
                        shop,
                        collection_id,
                        product_id,
                        product_position,
                        collection_position
                     ) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(shop.as_str())
                .bind(&collection_id)
                .bind(&product_id)
                .bind(product_position as i64)
                .bind(*collection_position)
                .execute(&mut *tx)
                .await?;
                *collection_position += 1;
            }
        }

        tx.commit().await?;

        let summary = snapshot.summary();
        info!(
            event_name = "catalog.imported",
            shop = %shop,
            products = summary.products,
            variants = summary.variants,
            collections = summary.collections,
            "catalog mirror replaced"
        );
        Ok(summary)
    }

    async fn siblings(
        &self,
        shop: &ShopDomain,
        handle: &str,
        max_products: usize,
        variants_per_product: usize,
    ) -> Result<Option<CollectionSiblings>, RepositoryError> {
        let Some(product_id) = sqlx::query_scalar::<_, String>(
            "SELECT id FROM catalog_product WHERE shop = ? AND handle = ?",
        )
        .bind(shop.as_str())
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let Some(collection_id) = sqlx::query_scalar::<_, String>(
            "SELECT collection_id
             FROM catalog_collection_product
             WHERE shop = ? AND product_id = ?
             ORDER BY collection_position ASC, collection_id ASC
             LIMIT 1",
        )
        .bind(shop.as_str())
        .bind(&product_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let member_ids = sqlx::query_scalar::<_, String>(
            "SELECT product_id
             FROM catalog_collection_product
             WHERE shop = ? AND collection_id = ?
             ORDER BY product_position ASC, product_id ASC
             LIMIT ?",
        )
        .bind(shop.as_str())
        .bind(&collection_id)
        .bind(max_products as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut variant_ids = Vec::new();
        for member_id in member_ids.iter().filter(|id| **id != product_id) {
            let ids = sqlx::query_scalar::<_, String>(
                "SELECT id
                 FROM catalog_variant
                 WHERE shop = ? AND product_id = ?
                 ORDER BY position ASC, id ASC
                 LIMIT ?",
            )
            .bind(shop.as_str())
            .bind(member_id)
            .bind(variants_per_product as i64)
            .fetch_all(&self.pool)
            .await?;
            variant_ids.extend(ids.into_iter().map(VariantId));
        }

        Ok(Some(CollectionSiblings {
            product_id: ProductId(product_id),
            collection_id,
            variant_ids,
        }))
    }

    async fn variants(
        &self,
        shop: &ShopDomain,
        ids: &[VariantId],
    ) -> Result<Vec<CatalogVariant>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT
                v.id AS variant_id,
                v.title AS variant_title,
                v.price,
                v.available_for_sale,
                v.inventory_tracked,
                v.inventory_quantity,
                v.image_url,
                p.id AS product_id,
                p.handle,
                p.title AS product_title,
                p.is_gift_card,
                p.featured_image_url
             FROM catalog_variant v
             JOIN catalog_product p ON p.shop = v.shop AND p.id = v.product_id
             WHERE v.shop = ",
        );
        query.push_bind(shop.as_str());
        query.push(" AND v.id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut by_id: HashMap<String, CatalogVariant> = rows
            .into_iter()
            .map(variant_from_row)
            .map(|variant| variant.map(|variant| (variant.id.0.clone(), variant)))
            .collect::<Result<_, _>>()?;

        Ok(ids.iter().filter_map(|id| by_id.remove(id.as_str())).collect())
    }
}

#[async_trait::async_trait]
impl ProductCatalog for SqlProductCatalog {
    async fn collection_siblings(
        &self,
        shop: &ShopDomain,
        handle: &str,
        max_products: usize,
        variants_per_product: usize,
    ) -> Result<Option<CollectionSiblings>, CatalogError> {
        Ok(self.siblings(shop, handle, max_products, variants_per_product).await?)
    }

    async fn variants_by_ids(
        &self,
        shop: &ShopDomain,
        ids: &[VariantId],
    ) -> Result<Vec<CatalogVariant>, CatalogError> {
        Ok(self.variants(shop, ids).await?)
    }
}

fn variant_from_row(row: SqliteRow) -> Result<CatalogVariant, RepositoryError> {
    Ok(CatalogVariant {
        id: VariantId(row.try_get("variant_id")?),
        title: row.try_get("variant_title")?,
        price: row.try_get("price")?,
        available_for_sale: row.try_get("available_for_sale")?,
        inventory_tracked: row.try_get("inventory_tracked")?,
        inventory_quantity: row.try_get("inventory_quantity")?,
        image_url: row.try_get("image_url")?,
        product: CatalogProduct {
            id: ProductId(row.try_get("product_id")?),
            handle: row.try_get("handle")?,
            title: row.try_get("product_title")?,
            is_gift_card: row.try_get("is_gift_card")?,
            featured_image_url: row.try_get("featured_image_url")?,
        },
    })
}

#[cfg(test)]
mod tests {
    use ravenrock_core::catalog::ProductCatalog;
    use ravenrock_core::domain::shop::ShopDomain;
    use ravenrock_core::domain::variant::VariantId;

    use super::SqlProductCatalog;
    use crate::fixtures::{demo_catalog, DEMO_SHOP};
    use crate::{connect_with_settings, migrations};

    async fn setup_catalog() -> SqlProductCatalog {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let catalog = SqlProductCatalog::new(pool);
        catalog.import(&ShopDomain::new(DEMO_SHOP), &demo_catalog()).await.expect("import");
        catalog
    }

    fn ids(values: &[&str]) -> Vec<VariantId> {
        values.iter().map(|value| VariantId::new(*value)).collect()
    }

    #[tokio::test]
    async fn variants_by_ids_keeps_request_order_and_skips_unknown() {
        let catalog = setup_catalog().await;

        let variants = catalog
            .variants_by_ids(&ShopDomain::new(DEMO_SHOP), &ids(&["2003", "missing", "1001"]))
            .await
            .expect("lookup");

        let found: Vec<&str> = variants.iter().map(|variant| variant.id.as_str()).collect();
        assert_eq!(found, vec!["2003", "1001"]);
        assert_eq!(variants[1].product.handle, "merino-socks");
    }

    #[tokio::test]
    async fn lookups_are_scoped_by_shop() {
        let catalog = setup_catalog().await;

        let variants = catalog
            .variants_by_ids(&ShopDomain::new("other.myshopify.com"), &ids(&["1001"]))
            .await
            .expect("lookup");

        assert!(variants.is_empty());
    }

    #[tokio::test]
    async fn collection_siblings_exclude_current_product() {
        let catalog = setup_catalog().await;

        let siblings = catalog
            .collection_siblings(&ShopDomain::new(DEMO_SHOP), "merino-socks", 10, 10)
            .await
            .expect("siblings")
            .expect("collection exists");

        assert_eq!(siblings.collection_id, "410");
        assert_eq!(siblings.product_id.0, "100");
        assert!(siblings.variant_ids.iter().all(|id| !id.as_str().starts_with("10")));
        assert!(siblings.variant_ids.contains(&VariantId::new("2001")));
        assert!(siblings.variant_ids.contains(&VariantId::new("3001")));
    }

    #[tokio::test]
    async fn variants_per_product_cap_applies() {
        let catalog = setup_catalog().await;

        let siblings = catalog
            .collection_siblings(&ShopDomain::new(DEMO_SHOP), "merino-socks", 10, 1)
            .await
            .expect("siblings")
            .expect("collection exists");

        let from_beanie = siblings
            .variant_ids
            .iter()
            .filter(|id| id.as_str().starts_with("20"))
            .count();
        assert_eq!(from_beanie, 1);
    }

    #[tokio::test]
    async fn unknown_handle_has_no_siblings() {
        let catalog = setup_catalog().await;

        let siblings = catalog
            .collection_siblings(&ShopDomain::new(DEMO_SHOP), "does-not-exist", 10, 10)
            .await
            .expect("siblings");

        assert!(siblings.is_none());
    }

    #[tokio::test]
    async fn reimport_replaces_previous_rows() {
        let catalog = setup_catalog().await;
        let shop = ShopDomain::new(DEMO_SHOP);
        let mut smaller = demo_catalog();
        smaller.products.truncate(1);
        smaller.collections.clear();

        let summary = catalog.import(&shop, &smaller).await.expect("reimport");
        let variants =
            catalog.variants_by_ids(&shop, &ids(&["1001", "2001"])).await.expect("lookup");

        assert_eq!(summary.products, 1);
        assert_eq!(variants.len(), 1);
    }
}
