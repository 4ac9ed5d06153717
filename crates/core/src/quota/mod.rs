//! Monthly AI usage metering.
//!
//! The per-shop `(month, calls)` pair is the only shared mutable resource of
//! the recommendation path. It is read and written exclusively through
//! [`UsageStore::compare_and_swap`], driven by [`QuotaTracker`].

mod tracker;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use crate::domain::shop::{ShopDomain, ShopSettings, UpsellMode};
use crate::errors::StoreError;

pub use tracker::QuotaTracker;

/// Attempts made against the store before a conflicted request is refused.
pub const MAX_SWAP_ATTEMPTS: usize = 2;

/// UTC `YYYY-MM`.
pub fn month_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub month: Option<String>,
    pub calls: u32,
    pub limit: u32,
}

impl UsageSnapshot {
    pub fn from_settings(settings: &ShopSettings) -> Self {
        Self {
            month: settings.ai_usage_month.clone(),
            calls: settings.ai_calls_this_month,
            limit: settings.ai_monthly_limit,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsagePlan {
    pub allowed: bool,
    pub next: UsageSnapshot,
    /// False when `next` equals the current snapshot and nothing needs storing.
    pub write: bool,
}

/// Reset-then-check-then-increment as a pure step.
pub fn plan_usage(current: &UsageSnapshot, month_key: &str) -> UsagePlan {
    let rolled_over = current.month.as_deref() != Some(month_key);
    let calls = if rolled_over { 0 } else { current.calls };
    let allowed = calls < current.limit;
    let next = UsageSnapshot {
        month: Some(month_key.to_string()),
        calls: if allowed { calls.saturating_add(1) } else { calls },
        limit: current.limit,
    };

    UsagePlan { allowed, write: next != *current, next }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwapOutcome {
    Applied,
    /// The stored pair no longer matched `expected`; carries what is stored now.
    Conflict(UsageSnapshot),
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn load_usage(&self, shop: &ShopDomain) -> Result<UsageSnapshot, StoreError>;

    /// Stores `next.month`/`next.calls` only if the stored pair still equals
    /// `expected.month`/`expected.calls`. `limit` is never written.
    async fn compare_and_swap(
        &self,
        shop: &ShopDomain,
        expected: &UsageSnapshot,
        next: &UsageSnapshot,
    ) -> Result<SwapOutcome, StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    pub enabled: bool,
    pub allowed: bool,
    pub degraded: bool,
    pub used: u32,
    pub limit: u32,
    pub month_key: String,
}

impl QuotaDecision {
    pub fn disabled(settings: &ShopSettings, month_key: String) -> Self {
        Self {
            enabled: false,
            allowed: false,
            degraded: false,
            used: settings.ai_calls_this_month,
            limit: settings.ai_monthly_limit,
            month_key,
        }
    }

    pub fn exhausted(snapshot: &UsageSnapshot, month_key: String) -> Self {
        Self {
            enabled: true,
            allowed: false,
            degraded: true,
            used: snapshot.calls,
            limit: snapshot.limit,
            month_key,
        }
    }

    fn from_plan(plan: &UsagePlan, month_key: String) -> Self {
        Self {
            enabled: true,
            allowed: plan.allowed,
            degraded: !plan.allowed,
            used: plan.next.calls,
            limit: plan.next.limit,
            month_key,
        }
    }

    /// Mode for this request only; the stored mode is never changed.
    pub fn request_mode(&self, settings: &ShopSettings) -> UpsellMode {
        if self.degraded {
            settings.ai_fallback_mode
        } else {
            settings.upsell_mode
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{month_key, plan_usage, UsageSnapshot};

    fn snapshot(month: Option<&str>, calls: u32, limit: u32) -> UsageSnapshot {
        UsageSnapshot { month: month.map(str::to_string), calls, limit }
    }

    #[test]
    fn month_key_is_zero_padded_utc() {
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 59).single().expect("valid time");
        assert_eq!(month_key(now), "2026-03");
    }

    #[test]
    fn plan_increments_within_limit() {
        let plan = plan_usage(&snapshot(Some("2026-03"), 4, 10), "2026-03");

        assert!(plan.allowed);
        assert!(plan.write);
        assert_eq!(plan.next, snapshot(Some("2026-03"), 5, 10));
    }

    #[test]
    fn plan_resets_before_checking_limit_on_new_month() {
        let plan = plan_usage(&snapshot(Some("2026-02"), 10, 10), "2026-03");

        assert!(plan.allowed);
        assert_eq!(plan.next, snapshot(Some("2026-03"), 1, 10));
    }

    #[test]
    fn plan_at_limit_same_month_is_refused_without_write() {
        let current = snapshot(Some("2026-03"), 10, 10);
        let plan = plan_usage(&current, "2026-03");

        assert!(!plan.allowed);
        assert!(!plan.write);
        assert_eq!(plan.next, current);
    }

    #[test]
    fn first_ever_call_claims_month() {
        let plan = plan_usage(&snapshot(None, 0, 1), "2026-03");

        assert!(plan.allowed);
        assert_eq!(plan.next, snapshot(Some("2026-03"), 1, 1));
    }
}
