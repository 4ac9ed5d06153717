use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{
    month_key, plan_usage, QuotaDecision, SwapOutcome, UsageSnapshot, UsageStore,
    MAX_SWAP_ATTEMPTS,
};
use crate::domain::shop::ShopSettings;

#[derive(Clone)]
pub struct QuotaTracker {
    store: Arc<dyn UsageStore>,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Meters one request for `settings.shop`.
    ///
    /// Starts from the counters carried by `settings`; a conflicting
    /// concurrent update is retried once against the stored values, after
    /// which the request is refused instead of waiting.
    pub async fn check_and_consume(
        &self,
        settings: &ShopSettings,
        now: DateTime<Utc>,
    ) -> QuotaDecision {
        let key = month_key(now);
        if !settings.ai_enabled {
            return QuotaDecision::disabled(settings, key);
        }

        let mut current = UsageSnapshot::from_settings(settings);
        for attempt in 0..MAX_SWAP_ATTEMPTS {
            let plan = plan_usage(&current, &key);
            if !plan.write {
                return QuotaDecision::from_plan(&plan, key);
            }

            match self.store.compare_and_swap(&settings.shop, &current, &plan.next).await {
                Ok(SwapOutcome::Applied) => {
                    debug!(
                        event_name = "quota.usage.applied",
                        shop = %settings.shop,
                        month_key = %key,
                        used = plan.next.calls,
                        allowed = plan.allowed,
                        "ai usage counter updated"
                    );
                    return QuotaDecision::from_plan(&plan, key);
                }
                Ok(SwapOutcome::Conflict(stored)) => {
                    warn!(
                        event_name = "quota.usage.conflict",
                        shop = %settings.shop,
                        attempt,
                        stored_calls = stored.calls,
                        "concurrent ai usage update detected"
                    );
                    // The limit is never stored by the swap; keep the normalized one.
                    current = UsageSnapshot { limit: current.limit, ..stored };
                }
                Err(error) => {
                    warn!(
                        event_name = "quota.usage.store_failed",
                        shop = %settings.shop,
                        error = %error,
                        "ai usage store failed; refusing metered call"
                    );
                    return QuotaDecision::exhausted(&current, key);
                }
            }
        }

        warn!(
            event_name = "quota.usage.race_exhausted",
            shop = %settings.shop,
            attempts = MAX_SWAP_ATTEMPTS,
            "ai usage update kept conflicting; treating call as not allowed"
        );
        QuotaDecision::exhausted(&current, key)
    }
}
