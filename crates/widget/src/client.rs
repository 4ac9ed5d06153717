use std::time::Duration;

use async_trait::async_trait;
use ravenrock_core::proxy::{RecommendationResponse, WidgetConfigResponse};
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2_000);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("response could not be decoded: {0}")]
    Decode(String),
    #[error("cart rejected the item: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Storefront context sent with a recommendation request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecommendationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shop: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[async_trait]
pub trait UpsellApi: Send + Sync {
    async fn widget_config(&self, shop: Option<&str>) -> Result<WidgetConfigResponse, ClientError>;
    async fn recommendations(
        &self,
        params: &RecommendationParams,
    ) -> Result<RecommendationResponse, ClientError>;
}

#[async_trait]
pub trait CartClient: Send + Sync {
    async fn add(&self, variant_id: &str, quantity: u32) -> Result<(), ClientError>;

    /// Best-effort notification that the host cart UI should reload.
    async fn refresh(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Calls the app-proxy routes with a hard timeout and no retries.
#[derive(Clone, Debug)]
pub struct HttpUpsellApi {
    client: reqwest::Client,
    base: String,
}

impl HttpUpsellApi {
    pub fn new(storefront_url: &str, proxy_prefix: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base = format!(
            "{}/{}",
            storefront_url.trim_end_matches('/'),
            proxy_prefix.trim_matches('/')
        );
        Ok(Self { client, base })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{route}", self.base)
    }
}

#[async_trait]
impl UpsellApi for HttpUpsellApi {
    async fn widget_config(&self, shop: Option<&str>) -> Result<WidgetConfigResponse, ClientError> {
        let mut request = self.client.get(self.url("config")).header("Accept", "application/json");
        if let Some(shop) = shop {
            request = request.query(&[("shop", shop)]);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn recommendations(
        &self,
        params: &RecommendationParams,
    ) -> Result<RecommendationResponse, ClientError> {
        let response = self
            .client
            .get(self.url("recommendations"))
            .header("Accept", "application/json")
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Shopify AJAX cart endpoints under the storefront root.
#[derive(Clone, Debug)]
pub struct HttpCartClient {
    client: reqwest::Client,
    root: String,
}

#[derive(Serialize)]
struct CartLine<'a> {
    id: &'a str,
    quantity: u32,
}

impl HttpCartClient {
    pub fn new(storefront_root: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, root: format!("{}/", storefront_root.trim_end_matches('/')) })
    }
}

#[async_trait]
impl CartClient for HttpCartClient {
    async fn add(&self, variant_id: &str, quantity: u32) -> Result<(), ClientError> {
        let id = variant_id.trim();
        if id.is_empty() {
            return Err(ClientError::Rejected("missing variant id".to_string()));
        }

        let response = self
            .client
            .post(format!("{}cart/add.js", self.root))
            .header("Accept", "application/json")
            .form(&CartLine { id, quantity })
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status().as_u16();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let reason = body
            .get("description")
            .or_else(|| body.get("message"))
            .and_then(|value| value.as_str())
            .map(str::to_string);
        Err(reason.map_or(ClientError::Status(status), ClientError::Rejected))
    }

    async fn refresh(&self) -> Result<(), ClientError> {
        self.client
            .get(format!("{}cart.js", self.root))
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
