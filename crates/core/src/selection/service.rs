use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};

use super::{RecommendationRequest, SelectionEngine, SelectionPolicy};
use crate::catalog::ProductCatalog;
use crate::domain::shop::{ShopDomain, ShopSettings};
use crate::errors::ApplicationError;
use crate::proxy::{RecommendationResponse, WidgetConfigResponse, WidgetDefaults};
use crate::quota::{QuotaTracker, UsageStore};
use crate::settings::SettingsStore;

/// One storefront request end to end: settings, quota, selection, envelope.
pub struct RecommendationService {
    settings: Arc<dyn SettingsStore>,
    quota: QuotaTracker,
    engine: SelectionEngine,
    widget: WidgetDefaults,
}

impl RecommendationService {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        usage: Arc<dyn UsageStore>,
        catalog: Arc<dyn ProductCatalog>,
        policy: SelectionPolicy,
        widget: WidgetDefaults,
    ) -> Self {
        Self {
            settings,
            quota: QuotaTracker::new(usage),
            engine: SelectionEngine::new(catalog, policy),
            widget,
        }
    }

    pub fn widget_defaults(&self) -> &WidgetDefaults {
        &self.widget
    }

    pub async fn recommend<R>(
        &self,
        request: &RecommendationRequest,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> RecommendationResponse
    where
        R: Rng + Send,
    {
        if request.shop.as_str().trim().is_empty() {
            return RecommendationResponse::no_shop(self.widget.default_locale.clone());
        }

        let settings = self.load_settings(&request.shop).await;
        let decision = self.quota.check_and_consume(&settings, now).await;
        let scoped = settings.with_request_mode(decision.request_mode(&settings));
        let selection = self.engine.select(request, &scoped, rng).await;

        info!(
            event_name = "recommendations.served",
            shop = %request.shop,
            mode = selection.meta.mode.as_str(),
            items = selection.items.len(),
            degraded = decision.degraded,
            "recommendations served"
        );

        RecommendationResponse::from_selection(&selection, &decision, &scoped, self.locale(&settings))
    }

    pub async fn widget_config(&self, shop: &ShopDomain) -> WidgetConfigResponse {
        if shop.as_str().trim().is_empty() {
            return WidgetConfigResponse::failed(
                &self.widget,
                crate::proxy::NO_SHOP_CONTEXT,
                "request carried no shop",
            );
        }

        match self.settings.load_or_create(shop).await {
            Ok(settings) => WidgetConfigResponse::from_settings(&settings.normalized(), &self.widget),
            Err(error) => {
                let error = ApplicationError::from(error);
                warn!(
                    event_name = "widget_config.settings_failed",
                    shop = %shop,
                    error = %error,
                    "settings unavailable; serving widget defaults"
                );
                WidgetConfigResponse::failed(&self.widget, error.error_code(), error.to_string())
            }
        }
    }

    async fn load_settings(&self, shop: &ShopDomain) -> ShopSettings {
        match self.settings.load_or_create(shop).await {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                warn!(
                    event_name = "recommendations.settings_failed",
                    shop = %shop,
                    error = %error,
                    "settings unavailable; using built-in defaults"
                );
                ShopSettings::defaults_for(shop.clone())
            }
        }
    }

    fn locale(&self, settings: &ShopSettings) -> String {
        settings.widget_locale.clone().unwrap_or_else(|| self.widget.default_locale.clone())
    }
}
