use chrono::Utc;
use ravenrock_core::domain::shop::{ShopDomain, ShopSettings};
use ravenrock_core::quota::month_key;
use ravenrock_db::repositories::SqlShopSettingsRepository;
use serde::Serialize;

use crate::commands::{load_config, open_database, runtime, CommandResult};

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub shop: String,
    pub ai_enabled: bool,
    pub month_key: String,
    /// Calls counted against `month_key`; a stale stored month counts as zero.
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub stored_month: Option<String>,
}

impl UsageReport {
    pub fn from_settings(settings: &ShopSettings, month_key: String) -> Self {
        let current = settings.ai_usage_month.as_deref() == Some(month_key.as_str());
        let used = if current { settings.ai_calls_this_month } else { 0 };
        Self {
            shop: settings.shop.to_string(),
            ai_enabled: settings.ai_enabled,
            used,
            limit: settings.ai_monthly_limit,
            remaining: settings.ai_monthly_limit.saturating_sub(used),
            stored_month: settings.ai_usage_month.clone(),
            month_key,
        }
    }
}

/// Read-only view of a shop's monthly AI quota. Never consumes a call.
pub fn run(shop: &str) -> CommandResult {
    let shop = shop.trim().to_ascii_lowercase();
    if shop.is_empty() {
        return CommandResult::failure("usage", "usage", "--shop must not be empty", 2);
    }

    let config = match load_config("usage") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("usage") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let found = SqlShopSettingsRepository::new(pool.clone())
            .find(&ShopDomain::new(shop.clone()))
            .await
            .map_err(|error| ("settings", error.to_string(), 7u8));
        pool.close().await;
        found
    });

    match result {
        Ok(Some(settings)) => {
            let report = UsageReport::from_settings(&settings, month_key(Utc::now()));
            let message = format!(
                "{}: {}/{} AI calls used in {} (ai {})",
                report.shop,
                report.used,
                report.limit,
                report.month_key,
                if report.ai_enabled { "enabled" } else { "disabled" }
            );
            CommandResult::success_with("usage", message, serde_json::to_value(&report).ok())
        }
        Ok(None) => CommandResult::failure(
            "usage",
            "unknown_shop",
            format!("no settings stored for `{shop}`"),
            8,
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("usage", error_class, message, exit_code)
        }
    }
}
