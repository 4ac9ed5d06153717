use async_trait::async_trait;

use crate::domain::shop::{ShopDomain, ShopSettings};
use crate::errors::StoreError;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns the shop's record, creating one with defaults when missing.
    async fn load_or_create(&self, shop: &ShopDomain) -> Result<ShopSettings, StoreError>;

    /// Writes merchant-owned fields. Usage counters are left untouched.
    async fn save(&self, settings: &ShopSettings) -> Result<(), StoreError>;
}
