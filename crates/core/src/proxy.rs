//! Wire envelopes of the storefront proxy calls.
//!
//! Shared by the server (serializer) and the widget (deserializer). Every
//! optional field is skipped when absent so error envelopes stay small.

use serde::{Deserialize, Serialize};

use crate::domain::shop::{ShopDomain, ShopSettings, TriggerType, UpsellMode};
use crate::domain::variant::{ReasonKey, VariantCard};
use crate::quota::QuotaDecision;
use crate::selection::{Selection, SelectionSource};

pub const NO_SHOP_CONTEXT: &str = "no_shop_context";
pub const DEFAULT_LOCALE: &str = "en";
pub const DEFAULT_FREQUENCY_HOURS: u32 = 24;
pub const DEFAULT_UPSELL_DELAY_SECS: u32 = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationItem {
    pub variant_id: String,
    pub title: String,
    pub price: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub reason_key: ReasonKey,
}

impl From<&VariantCard> for RecommendationItem {
    fn from(card: &VariantCard) -> Self {
        Self {
            variant_id: card.id.0.clone(),
            title: card.title.clone(),
            price: card.price.clone(),
            image_url: card.image_url.clone(),
            reason_key: card.reason_key,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiMeta {
    pub enabled: bool,
    pub allowed: bool,
    pub degraded: bool,
    pub used: u32,
    pub limit: u32,
    pub month_key: String,
}

impl From<&QuotaDecision> for AiMeta {
    fn from(decision: &QuotaDecision) -> Self {
        Self {
            enabled: decision.enabled,
            allowed: decision.allowed,
            degraded: decision.degraded,
            used: decision.used,
            limit: decision.limit,
            month_key: decision.month_key.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<UpsellMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SelectionSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_candidates: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to_cart: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_out_of_stock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai: Option<AiMeta>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationResponse {
    pub locale: String,
    pub items: Vec<RecommendationItem>,
    pub meta: ResponseMeta,
}

impl RecommendationResponse {
    pub fn no_shop(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            items: Vec::new(),
            meta: ResponseMeta { error: Some(NO_SHOP_CONTEXT.to_string()), ..ResponseMeta::default() },
        }
    }

    pub fn from_selection(
        selection: &Selection,
        decision: &QuotaDecision,
        settings: &ShopSettings,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            locale: locale.into(),
            items: selection.items.iter().map(RecommendationItem::from).collect(),
            meta: ResponseMeta {
                mode: Some(selection.meta.mode),
                limit: Some(selection.meta.limit),
                source: Some(selection.meta.source),
                used_candidates: Some(selection.meta.used_candidates),
                redirect_to_cart: Some(settings.redirect_to_cart),
                exclude_out_of_stock: Some(settings.exclude_out_of_stock),
                error: selection.meta.error.clone(),
                ai: Some(AiMeta::from(decision)),
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiUsageSummary {
    pub enabled: bool,
    pub used: u32,
    pub limit: u32,
}

/// Process-wide widget timings served with every config call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WidgetDefaults {
    pub frequency_hours: u32,
    pub upsell_delay_secs: u32,
    pub auto_open: bool,
    pub default_locale: String,
}

impl Default for WidgetDefaults {
    fn default() -> Self {
        Self {
            frequency_hours: DEFAULT_FREQUENCY_HOURS,
            upsell_delay_secs: DEFAULT_UPSELL_DELAY_SECS,
            auto_open: true,
            default_locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WidgetConfigResponse {
    pub trigger_type: TriggerType,
    pub trigger_delay_sec: u32,
    pub frequency_hours: u32,
    pub upsell_delay_sec: u32,
    pub auto_open: bool,
    pub locale: String,
    pub redirect_to_cart: bool,
    pub ai: AiUsageSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Default for WidgetConfigResponse {
    fn default() -> Self {
        Self::from_settings(
            &ShopSettings::defaults_for(ShopDomain::new("")),
            &WidgetDefaults::default(),
        )
    }
}

impl WidgetConfigResponse {
    pub fn from_settings(settings: &ShopSettings, defaults: &WidgetDefaults) -> Self {
        Self {
            trigger_type: settings.trigger_type,
            trigger_delay_sec: settings.trigger_delay_secs,
            frequency_hours: defaults.frequency_hours,
            upsell_delay_sec: defaults.upsell_delay_secs,
            auto_open: defaults.auto_open,
            locale: settings
                .widget_locale
                .clone()
                .unwrap_or_else(|| defaults.default_locale.clone()),
            redirect_to_cart: settings.redirect_to_cart,
            ai: AiUsageSummary {
                enabled: settings.ai_enabled,
                used: settings.ai_calls_this_month,
                limit: settings.ai_monthly_limit,
            },
            error: None,
            message: None,
        }
    }

    /// Defaults plus an `{error, message}` pair, still a success envelope.
    pub fn failed(defaults: &WidgetDefaults, error: &str, message: impl Into<String>) -> Self {
        let mut response = Self::from_settings(
            &ShopSettings::defaults_for(ShopDomain::new("")),
            defaults,
        );
        response.error = Some(error.to_string());
        response.message = Some(message.into());
        response
    }
}
