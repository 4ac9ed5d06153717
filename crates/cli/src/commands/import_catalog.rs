use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ravenrock_core::domain::shop::ShopDomain;
use ravenrock_core::settings::SettingsStore;
use ravenrock_db::repositories::{CatalogSnapshot, ImportSummary, SqlProductCatalog, SqlShopSettingsRepository};
use ravenrock_db::{seed_demo, DEMO_SHOP};
use serde_json::json;

use crate::commands::{load_config, open_database, runtime, CommandResult, StepError};

#[derive(Debug, Clone)]
pub enum ImportSource {
    File { shop: String, path: PathBuf },
    Demo,
}

impl ImportSource {
    pub fn from_args(shop: Option<String>, file: Option<PathBuf>, demo: bool) -> Option<Self> {
        if demo {
            return Some(Self::Demo);
        }
        let shop = shop.map(|shop| shop.trim().to_ascii_lowercase()).filter(|shop| !shop.is_empty())?;
        Some(Self::File { shop, path: file? })
    }
}

/// Replaces a shop's catalog with a JSON snapshot, or loads the demo store.
/// The shop's settings row is created with defaults when missing.
pub fn run(source: Option<ImportSource>) -> CommandResult {
    let Some(source) = source else {
        return CommandResult::failure(
            "import-catalog",
            "usage",
            "either --demo or both --shop and --file are required",
            2,
        );
    };

    let snapshot = match &source {
        ImportSource::File { path, .. } => match read_snapshot(path) {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                return CommandResult::failure("import-catalog", "snapshot", format!("{error:#}"), 6);
            }
        },
        ImportSource::Demo => None,
    };

    let config = match load_config("import-catalog") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("import-catalog") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let outcome = match (&source, snapshot) {
            (ImportSource::File { shop, .. }, Some(snapshot)) => {
                import_file(&pool, &ShopDomain::new(shop.clone()), &snapshot).await
            }
            _ => seed_demo(&pool)
                .await
                .map(|summary| (ShopDomain::new(DEMO_SHOP), summary))
                .map_err(|error| ("import", error.to_string(), 7u8)),
        };
        pool.close().await;
        outcome
    });

    match result {
        Ok((shop, summary)) => CommandResult::success_with(
            "import-catalog",
            format!(
                "imported {} product(s), {} variant(s), {} collection(s) for {shop}",
                summary.products, summary.variants, summary.collections
            ),
            Some(json!({ "shop": shop, "summary": summary })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("import-catalog", error_class, message, exit_code)
        }
    }
}

async fn import_file(
    pool: &ravenrock_db::DbPool,
    shop: &ShopDomain,
    snapshot: &CatalogSnapshot,
) -> Result<(ShopDomain, ImportSummary), StepError> {
    let summary = SqlProductCatalog::new(pool.clone())
        .import(shop, snapshot)
        .await
        .map_err(|error| ("import", error.to_string(), 7u8))?;
    SqlShopSettingsRepository::new(pool.clone())
        .load_or_create(shop)
        .await
        .map_err(|error| ("settings", error.to_string(), 7u8))?;
    Ok((shop.clone(), summary))
}

fn read_snapshot(path: &Path) -> anyhow::Result<CatalogSnapshot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog snapshot `{}`", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("catalog snapshot `{}` is not valid JSON", path.display()))
}
