use serde::{Deserialize, Serialize};

use crate::domain::variant::VariantId;

pub const MAX_RESULT_LIMIT: usize = 6;
pub const DEFAULT_RESULT_LIMIT: u32 = 3;
pub const DEFAULT_AI_MONTHLY_LIMIT: u32 = 1000;
pub const DEFAULT_TRIGGER_DELAY_SECS: u32 = 20;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShopDomain(pub String);

impl ShopDomain {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShopDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsellMode {
    #[default]
    Collection,
    Manual,
}

impl UpsellMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Manual => "manual",
        }
    }

    /// Stored values are free text; anything that is not `manual` selects
    /// collection mode.
    pub fn from_setting(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "manual" => Self::Manual,
            _ => Self::Collection,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Time,
    Scroll,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Scroll => "scroll",
        }
    }

    pub fn from_setting(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "scroll" => Self::Scroll,
            _ => Self::Time,
        }
    }
}

/// Per-shop merchant configuration plus the AI usage counter pair.
///
/// The usage fields (`ai_calls_this_month`, `ai_usage_month`) are written
/// only through the quota tracker's compare-and-set path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopSettings {
    pub shop: ShopDomain,
    pub upsell_mode: UpsellMode,
    pub manual_variant_ids: Vec<VariantId>,
    pub fallback_variant_ids: Vec<VariantId>,
    pub limit: u32,
    pub exclude_gift_cards: bool,
    pub exclude_out_of_stock: bool,
    pub redirect_to_cart: bool,
    pub ai_enabled: bool,
    pub ai_monthly_limit: u32,
    pub ai_calls_this_month: u32,
    pub ai_usage_month: Option<String>,
    pub ai_fallback_mode: UpsellMode,
    pub trigger_type: TriggerType,
    pub trigger_delay_secs: u32,
    pub widget_locale: Option<String>,
}

impl ShopSettings {
    pub fn defaults_for(shop: ShopDomain) -> Self {
        Self {
            shop,
            upsell_mode: UpsellMode::Collection,
            manual_variant_ids: Vec::new(),
            fallback_variant_ids: Vec::new(),
            limit: DEFAULT_RESULT_LIMIT,
            exclude_gift_cards: true,
            exclude_out_of_stock: true,
            redirect_to_cart: true,
            ai_enabled: false,
            ai_monthly_limit: DEFAULT_AI_MONTHLY_LIMIT,
            ai_calls_this_month: 0,
            ai_usage_month: None,
            ai_fallback_mode: UpsellMode::Collection,
            trigger_type: TriggerType::Time,
            trigger_delay_secs: DEFAULT_TRIGGER_DELAY_SECS,
            widget_locale: None,
        }
    }

    /// Repairs out-of-range values instead of rejecting the record.
    pub fn normalized(mut self) -> Self {
        if self.limit == 0 {
            self.limit = DEFAULT_RESULT_LIMIT;
        }
        self.limit = self.limit.min(MAX_RESULT_LIMIT as u32);
        if self.ai_monthly_limit == 0 {
            self.ai_monthly_limit = DEFAULT_AI_MONTHLY_LIMIT;
        }
        if self.trigger_delay_secs == 0 {
            self.trigger_delay_secs = DEFAULT_TRIGGER_DELAY_SECS;
        }
        self.widget_locale = self
            .widget_locale
            .map(|locale| locale.trim().to_string())
            .filter(|locale| !locale.is_empty() && locale != "auto");
        self
    }

    /// `min(requested > 0 ? requested : limit, 6)`.
    pub fn effective_limit(&self, requested: Option<i64>) -> usize {
        let base = match requested {
            Some(value) if value > 0 => usize::try_from(value).unwrap_or(MAX_RESULT_LIMIT),
            _ => self.limit as usize,
        };
        base.min(MAX_RESULT_LIMIT)
    }

    /// Copy of these settings with the mode replaced for a single request.
    pub fn with_request_mode(&self, mode: UpsellMode) -> Self {
        Self { upsell_mode: mode, ..self.clone() }
    }
}
