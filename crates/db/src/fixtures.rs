//! Demo shop used by tests, local runs and `ravenrock import-catalog --demo`.

use ravenrock_core::domain::shop::{ShopDomain, ShopSettings};
use ravenrock_core::domain::variant::VariantId;
use ravenrock_core::settings::SettingsStore;

use crate::connection::DbPool;
use crate::repositories::{
    CatalogSnapshot, ImportSummary, RepositoryError, SnapshotCollection, SnapshotProduct,
    SnapshotVariant, SqlProductCatalog, SqlShopSettingsRepository,
};

pub const DEMO_SHOP: &str = "demo.myshopify.com";

fn variant(id: &str, title: &str, price: &str) -> SnapshotVariant {
    SnapshotVariant {
        id: format!("gid://shopify/ProductVariant/{id}"),
        title: title.to_string(),
        price: price.to_string(),
        available_for_sale: true,
        inventory_tracked: true,
        inventory_quantity: Some(12),
        image_url: None,
    }
}

/// Four products in one "winter" collection: plain, multi-variant, gift card,
/// and sold out.
pub fn demo_catalog() -> CatalogSnapshot {
    CatalogSnapshot {
        products: vec![
            SnapshotProduct {
                id: "gid://shopify/Product/100".to_string(),
                handle: "merino-socks".to_string(),
                title: "Merino Socks".to_string(),
                is_gift_card: false,
                featured_image_url: Some("https://cdn.example/merino.jpg".to_string()),
                variants: vec![variant("1001", "Small", "14.00"), variant("1002", "Large", "14.00")],
            },
            SnapshotProduct {
                id: "gid://shopify/Product/200".to_string(),
                handle: "cable-beanie".to_string(),
                title: "Cable Beanie".to_string(),
                is_gift_card: false,
                featured_image_url: None,
                variants: vec![
                    variant("2001", "Charcoal", "22.00"),
                    variant("2002", "Oat", "22.00"),
                    variant("2003", "Rust", "22.00"),
                ],
            },
            SnapshotProduct {
                id: "gid://shopify/Product/300".to_string(),
                handle: "gift-card".to_string(),
                title: "Gift Card".to_string(),
                is_gift_card: true,
                featured_image_url: None,
                variants: vec![SnapshotVariant {
                    inventory_tracked: false,
                    inventory_quantity: None,
                    ..variant("3001", "Default Title", "25.00")
                }],
            },
            SnapshotProduct {
                id: "gid://shopify/Product/400".to_string(),
                handle: "alpaca-scarf".to_string(),
                title: "Alpaca Scarf".to_string(),
                is_gift_card: false,
                featured_image_url: None,
                variants: vec![SnapshotVariant {
                    inventory_quantity: Some(0),
                    ..variant("4001", "Default Title", "48.00")
                }],
            },
        ],
        collections: vec![SnapshotCollection {
            id: "gid://shopify/Collection/410".to_string(),
            handle: "winter".to_string(),
            title: "Winter".to_string(),
            product_ids: vec![
                "gid://shopify/Product/100".to_string(),
                "gid://shopify/Product/200".to_string(),
                "gid://shopify/Product/300".to_string(),
                "gid://shopify/Product/400".to_string(),
            ],
        }],
    }
}

/// Collection mode with the beanie variants as store picks.
pub fn demo_settings() -> ShopSettings {
    ShopSettings {
        fallback_variant_ids: ["2001", "2002", "2003"].into_iter().map(VariantId::new).collect(),
        ..ShopSettings::defaults_for(ShopDomain::new(DEMO_SHOP))
    }
}

pub async fn seed_demo(pool: &DbPool) -> Result<ImportSummary, RepositoryError> {
    let summary =
        SqlProductCatalog::new(pool.clone()).import(&ShopDomain::new(DEMO_SHOP), &demo_catalog()).await?;

    let settings = SqlShopSettingsRepository::new(pool.clone());
    settings
        .save(&demo_settings())
        .await
        .map_err(|error| RepositoryError::Decode(format!("seed demo settings: {error}")))?;

    Ok(summary)
}
