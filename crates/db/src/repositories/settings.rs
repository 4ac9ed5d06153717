use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};
use tracing::debug;

use ravenrock_core::domain::shop::{ShopDomain, ShopSettings, TriggerType, UpsellMode};
use ravenrock_core::domain::variant::VariantId;
use ravenrock_core::errors::StoreError;
use ravenrock_core::quota::{SwapOutcome, UsageSnapshot, UsageStore};
use ravenrock_core::settings::SettingsStore;

use super::{parse_u32, RepositoryError};
use crate::DbPool;

const SETTINGS_COLUMNS: &str = "shop,
    upsell_mode,
    manual_variant_ids,
    fallback_variant_ids,
    result_limit,
    exclude_gift_cards,
    exclude_out_of_stock,
    redirect_to_cart,
    ai_enabled,
    ai_monthly_limit,
    ai_calls_this_month,
    ai_usage_month,
    ai_fallback_mode,
    trigger_type,
    trigger_delay_secs,
    widget_locale";

pub struct SqlShopSettingsRepository {
    pool: DbPool,
}

impl SqlShopSettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, shop: &ShopDomain) -> Result<Option<ShopSettings>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SETTINGS_COLUMNS} FROM shop_settings WHERE shop = ?"
        ))
        .bind(shop.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(settings_from_row).transpose()
    }

    async fn insert_defaults(&self, shop: &ShopDomain) -> Result<(), RepositoryError> {
        let defaults = ShopSettings::defaults_for(shop.clone());
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO shop_settings (
                shop,
                upsell_mode,
                result_limit,
                exclude_gift_cards,
                exclude_out_of_stock,
                redirect_to_cart,
                ai_enabled,
                ai_monthly_limit,
                ai_fallback_mode,
                trigger_type,
                trigger_delay_secs,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(shop) DO NOTHING",
        )
        .bind(shop.as_str())
        .bind(defaults.upsell_mode.as_str())
        .bind(i64::from(defaults.limit))
        .bind(defaults.exclude_gift_cards)
        .bind(defaults.exclude_out_of_stock)
        .bind(defaults.redirect_to_cart)
        .bind(defaults.ai_enabled)
        .bind(i64::from(defaults.ai_monthly_limit))
        .bind(defaults.ai_fallback_mode.as_str())
        .bind(defaults.trigger_type.as_str())
        .bind(i64::from(defaults.trigger_delay_secs))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn usage(&self, shop: &ShopDomain) -> Result<Option<UsageSnapshot>, RepositoryError> {
        let row = sqlx::query(
            "SELECT ai_usage_month, ai_calls_this_month, ai_monthly_limit
             FROM shop_settings
             WHERE shop = ?",
        )
        .bind(shop.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<UsageSnapshot, RepositoryError> {
            Ok(UsageSnapshot {
                month: row.try_get("ai_usage_month")?,
                calls: parse_u32("ai_calls_this_month", row.try_get("ai_calls_this_month")?)?,
                limit: parse_u32("ai_monthly_limit", row.try_get("ai_monthly_limit")?)?,
            })
        })
        .transpose()
    }
}

#[async_trait::async_trait]
impl SettingsStore for SqlShopSettingsRepository {
    async fn load_or_create(&self, shop: &ShopDomain) -> Result<ShopSettings, StoreError> {
        if let Some(settings) = self.find(shop).await? {
            return Ok(settings);
        }

        self.insert_defaults(shop).await?;
        debug!(event_name = "settings.created", shop = %shop, "created default shop settings");

        self.find(shop).await?.ok_or_else(|| {
            StoreError::Persistence(format!("shop settings for `{shop}` vanished after insert"))
        })
    }

    async fn save(&self, settings: &ShopSettings) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO shop_settings (
                shop,
                upsell_mode,
                manual_variant_ids,
                fallback_variant_ids,
                result_limit,
                exclude_gift_cards,
                exclude_out_of_stock,
                redirect_to_cart,
                ai_enabled,
                ai_monthly_limit,
                ai_fallback_mode,
                trigger_type,
                trigger_delay_secs,
                widget_locale,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(shop) DO UPDATE SET
                upsell_mode = excluded.upsell_mode,
                manual_variant_ids = excluded.manual_variant_ids,
                fallback_variant_ids = excluded.fallback_variant_ids,
                result_limit = excluded.result_limit,
                exclude_gift_cards = excluded.exclude_gift_cards,
                exclude_out_of_stock = excluded.exclude_out_of_stock,
                redirect_to_cart = excluded.redirect_to_cart,
                ai_enabled = excluded.ai_enabled,
                ai_monthly_limit = excluded.ai_monthly_limit,
                ai_fallback_mode = excluded.ai_fallback_mode,
                trigger_type = excluded.trigger_type,
                trigger_delay_secs = excluded.trigger_delay_secs,
                widget_locale = excluded.widget_locale,
                updated_at = excluded.updated_at",
        )
        .bind(settings.shop.as_str())
        .bind(settings.upsell_mode.as_str())
        .bind(join_ids(&settings.manual_variant_ids))
        .bind(join_ids(&settings.fallback_variant_ids))
        .bind(i64::from(settings.limit))
        .bind(settings.exclude_gift_cards)
        .bind(settings.exclude_out_of_stock)
        .bind(settings.redirect_to_cart)
        .bind(settings.ai_enabled)
        .bind(i64::from(settings.ai_monthly_limit))
        .bind(settings.ai_fallback_mode.as_str())
        .bind(settings.trigger_type.as_str())
        .bind(i64::from(settings.trigger_delay_secs))
        .bind(settings.widget_locale.as_deref())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl UsageStore for SqlShopSettingsRepository {
    async fn load_usage(&self, shop: &ShopDomain) -> Result<UsageSnapshot, StoreError> {
        self.usage(shop)
            .await?
            .ok_or_else(|| StoreError::Persistence(format!("no settings row for `{shop}`")))
    }

    async fn compare_and_swap(
        &self,
        shop: &ShopDomain,
        expected: &UsageSnapshot,
        next: &UsageSnapshot,
    ) -> Result<SwapOutcome, StoreError> {
        let result = sqlx::query(
            "UPDATE shop_settings
             SET ai_calls_this_month = ?, ai_usage_month = ?, updated_at = ?
             WHERE shop = ? AND ai_calls_this_month = ? AND ai_usage_month IS ?",
        )
        .bind(i64::from(next.calls))
        .bind(next.month.as_deref())
        .bind(Utc::now().to_rfc3339())
        .bind(shop.as_str())
        .bind(i64::from(expected.calls))
        .bind(expected.month.as_deref())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 1 {
            return Ok(SwapOutcome::Applied);
        }

        let current = self.load_usage(shop).await?;
        Ok(SwapOutcome::Conflict(current))
    }
}

fn settings_from_row(row: SqliteRow) -> Result<ShopSettings, RepositoryError> {
    let manual_raw: String = row.try_get("manual_variant_ids")?;
    let fallback_raw: String = row.try_get("fallback_variant_ids")?;
    let upsell_mode_raw: String = row.try_get("upsell_mode")?;
    let fallback_mode_raw: String = row.try_get("ai_fallback_mode")?;
    let trigger_type_raw: String = row.try_get("trigger_type")?;

    Ok(ShopSettings {
        shop: ShopDomain(row.try_get("shop")?),
        upsell_mode: UpsellMode::from_setting(&upsell_mode_raw),
        manual_variant_ids: VariantId::parse_list(&manual_raw),
        fallback_variant_ids: VariantId::parse_list(&fallback_raw),
        limit: parse_u32("result_limit", row.try_get("result_limit")?)?,
        exclude_gift_cards: row.try_get("exclude_gift_cards")?,
        exclude_out_of_stock: row.try_get("exclude_out_of_stock")?,
        redirect_to_cart: row.try_get("redirect_to_cart")?,
        ai_enabled: row.try_get("ai_enabled")?,
        ai_monthly_limit: parse_u32("ai_monthly_limit", row.try_get("ai_monthly_limit")?)?,
        ai_calls_this_month: parse_u32(
            "ai_calls_this_month",
            row.try_get("ai_calls_this_month")?,
        )?,
        ai_usage_month: row.try_get("ai_usage_month")?,
        ai_fallback_mode: UpsellMode::from_setting(&fallback_mode_raw),
        trigger_type: TriggerType::from_setting(&trigger_type_raw),
        trigger_delay_secs: parse_u32("trigger_delay_secs", row.try_get("trigger_delay_secs")?)?,
        widget_locale: row.try_get("widget_locale")?,
    })
}

fn join_ids(ids: &[VariantId]) -> String {
    ids.iter().map(VariantId::as_str).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use ravenrock_core::domain::shop::{ShopDomain, ShopSettings, UpsellMode};
    use ravenrock_core::domain::variant::VariantId;
    use ravenrock_core::quota::{QuotaTracker, SwapOutcome, UsageSnapshot, UsageStore};
    use ravenrock_core::settings::SettingsStore;

    use super::SqlShopSettingsRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    const SHOP: &str = "demo.myshopify.com";

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn load_or_create_inserts_defaults_once() {
        let repo = SqlShopSettingsRepository::new(setup_pool().await);
        let shop = ShopDomain::new(SHOP);

        let created = repo.load_or_create(&shop).await.expect("create");
        let loaded = repo.load_or_create(&shop).await.expect("load");

        assert_eq!(created, ShopSettings::defaults_for(shop.clone()));
        assert_eq!(loaded, created);
    }

    #[tokio::test]
    async fn save_round_trips_merchant_fields_and_keeps_usage() {
        let repo = SqlShopSettingsRepository::new(setup_pool().await);
        let shop = ShopDomain::new(SHOP);
        let created = repo.load_or_create(&shop).await.expect("create");
        let applied = repo
            .compare_and_swap(
                &shop,
                &UsageSnapshot::from_settings(&created),
                &UsageSnapshot { month: Some("2026-03".to_string()), calls: 4, limit: 1000 },
            )
            .await
            .expect("swap");
        assert_eq!(applied, SwapOutcome::Applied);

        let edited = ShopSettings {
            upsell_mode: UpsellMode::Manual,
            manual_variant_ids: vec![VariantId::new("11"), VariantId::new("12")],
            fallback_variant_ids: vec![VariantId::new("90")],
            limit: 5,
            widget_locale: Some("de".to_string()),
            ai_calls_this_month: 0,
            ..created
        };
        repo.save(&edited).await.expect("save");

        let loaded = repo.load_or_create(&shop).await.expect("load");
        assert_eq!(loaded.upsell_mode, UpsellMode::Manual);
        assert_eq!(loaded.manual_variant_ids, edited.manual_variant_ids);
        assert_eq!(loaded.fallback_variant_ids, edited.fallback_variant_ids);
        assert_eq!(loaded.limit, 5);
        assert_eq!(loaded.widget_locale.as_deref(), Some("de"));
        assert_eq!(loaded.ai_calls_this_month, 4, "save must not reset usage counters");
        assert_eq!(loaded.ai_usage_month.as_deref(), Some("2026-03"));
    }

    #[tokio::test]
    async fn stale_expectation_reports_current_snapshot() {
        let repo = SqlShopSettingsRepository::new(setup_pool().await);
        let shop = ShopDomain::new(SHOP);
        repo.load_or_create(&shop).await.expect("create");

        let stale = UsageSnapshot { month: Some("2026-02".to_string()), calls: 9, limit: 1000 };
        let next = UsageSnapshot { month: Some("2026-03".to_string()), calls: 1, limit: 1000 };
        let outcome = repo.compare_and_swap(&shop, &stale, &next).await.expect("swap");

        assert_eq!(
            outcome,
            SwapOutcome::Conflict(UsageSnapshot { month: None, calls: 0, limit: 1000 })
        );
    }

    #[tokio::test]
    async fn null_month_matches_with_is_comparison() {
        let repo = SqlShopSettingsRepository::new(setup_pool().await);
        let shop = ShopDomain::new(SHOP);
        repo.load_or_create(&shop).await.expect("create");

        let expected = UsageSnapshot { month: None, calls: 0, limit: 1000 };
        let next = UsageSnapshot { month: Some("2026-03".to_string()), calls: 1, limit: 1000 };

        assert_eq!(
            repo.compare_and_swap(&shop, &expected, &next).await.expect("swap"),
            SwapOutcome::Applied
        );
        assert_eq!(repo.load_usage(&shop).await.expect("usage"), next);
    }

    #[tokio::test]
    async fn quota_tracker_over_sql_stops_at_limit() {
        let pool = setup_pool().await;
        let repo = Arc::new(SqlShopSettingsRepository::new(pool));
        let shop = ShopDomain::new(SHOP);
        let created = repo.load_or_create(&shop).await.expect("create");
        repo.save(&ShopSettings { ai_enabled: true, ai_monthly_limit: 2, ..created })
            .await
            .expect("enable ai");
        let tracker = QuotaTracker::new(repo.clone());
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 8, 0, 0).single().expect("valid time");

        let mut allowed = Vec::new();
        for _ in 0..3 {
            let settings = repo.load_or_create(&shop).await.expect("load");
            allowed.push(tracker.check_and_consume(&settings, now).await.allowed);
        }

        assert_eq!(allowed, vec![true, true, false]);
        let usage = repo.load_usage(&shop).await.expect("usage");
        assert_eq!(usage.calls, 2);
        assert_eq!(usage.month.as_deref(), Some("2026-03"));
    }

    #[tokio::test]
    async fn unset_monthly_limit_survives_a_concurrent_increment() {
        let repo = Arc::new(SqlShopSettingsRepository::new(setup_pool().await));
        let shop = ShopDomain::new(SHOP);
        let created = repo.load_or_create(&shop).await.expect("create");
        repo.save(&ShopSettings { ai_enabled: true, ai_monthly_limit: 0, ..created })
            .await
            .expect("enable ai");
        let settings = repo.load_or_create(&shop).await.expect("load").normalized();
        assert_eq!(settings.ai_monthly_limit, 1000);

        let seen = UsageSnapshot::from_settings(&settings);
        let bumped = UsageSnapshot { month: Some("2026-03".to_string()), calls: 1, limit: 0 };
        assert_eq!(
            repo.compare_and_swap(&shop, &seen, &bumped).await.expect("swap"),
            SwapOutcome::Applied
        );

        let tracker = QuotaTracker::new(repo.clone());
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 8, 0, 0).single().expect("valid time");
        let decision = tracker.check_and_consume(&settings, now).await;

        assert!(decision.allowed);
        assert!(!decision.degraded);
        assert_eq!(decision.used, 2);
        assert_eq!(decision.limit, 1000);
    }
}
