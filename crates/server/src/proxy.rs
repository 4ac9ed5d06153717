//! Storefront app-proxy routes.
//!
//! Every response is HTTP 200 with `Cache-Control: no-store`; failures travel
//! inside the JSON envelope so the widget never has to branch on status codes.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use ravenrock_core::domain::shop::ShopDomain;
use ravenrock_core::selection::{RecommendationRequest, RecommendationService};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ProxyState {
    service: Arc<RecommendationService>,
}

/// Raw storefront parameters. Everything is optional text so a malformed
/// value degrades instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct RecommendationQuery {
    pub shop: Option<String>,
    pub current_variant: Option<String>,
    pub product_handle: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigQuery {
    pub shop: Option<String>,
}

impl RecommendationQuery {
    fn into_request(self) -> RecommendationRequest {
        let mut request = RecommendationRequest::new(shop_of(self.shop));
        if let Some(current) = self.current_variant.filter(|value| !value.trim().is_empty()) {
            request = request.with_current_variant(current.trim());
        }
        if let Some(handle) = self.product_handle {
            request = request.with_product_handle(handle);
        }
        if let Some(limit) = self.limit.as_deref().and_then(parse_limit) {
            request = request.with_limit(limit);
        }
        request
    }
}

/// Numeric `limit`, truncated toward zero. Non-finite or non-numeric text is ignored.
fn parse_limit(raw: &str) -> Option<i64> {
    let value = raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())?;
    Some(value.trunc() as i64)
}

fn shop_of(raw: Option<String>) -> ShopDomain {
    ShopDomain::new(raw.map(|value| value.trim().to_ascii_lowercase()).unwrap_or_default())
}

pub fn router(prefix: &str, service: Arc<RecommendationService>) -> Router {
    Router::new()
        .route(&format!("{prefix}/recommendations"), get(recommendations))
        .route(&format!("{prefix}/config"), get(widget_config))
        .with_state(ProxyState { service })
}

pub async fn recommendations(
    State(state): State<ProxyState>,
    query: Result<Query<RecommendationQuery>, QueryRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let request = accept_query(query, &correlation_id).into_request();

    let mut rng = StdRng::from_entropy();
    let response = state.service.recommend(&request, Utc::now(), &mut rng).await;

    info!(
        event_name = "proxy.recommendations",
        correlation_id = %correlation_id,
        shop = %request.shop,
        items = response.items.len(),
        error = response.meta.error.as_deref().unwrap_or("none"),
        "recommendations request handled"
    );
    no_store(response)
}

pub async fn widget_config(
    State(state): State<ProxyState>,
    query: Result<Query<ConfigQuery>, QueryRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let shop = shop_of(accept_query(query, &correlation_id).shop);
    let response = state.service.widget_config(&shop).await;

    info!(
        event_name = "proxy.config",
        correlation_id = %correlation_id,
        shop = %shop,
        error = response.error.as_deref().unwrap_or("none"),
        "widget config request handled"
    );
    no_store(response)
}

fn accept_query<T: Default>(query: Result<Query<T>, QueryRejection>, correlation_id: &str) -> T {
    match query {
        Ok(Query(value)) => value,
        Err(rejection) => {
            warn!(
                event_name = "proxy.query_rejected",
                correlation_id = %correlation_id,
                error = %rejection,
                "unparseable query string; continuing with empty parameters"
            );
            T::default()
        }
    }
}

fn no_store<T: Serialize>(body: T) -> Response {
    ([(header::CACHE_CONTROL, "no-store")], Json(body)).into_response()
}
