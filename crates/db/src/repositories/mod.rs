use thiserror::Error;

use ravenrock_core::errors::{CatalogError, StoreError};

pub mod catalog;
pub mod memory;
pub mod settings;

pub use catalog::{
    CatalogSnapshot, ImportSummary, SnapshotCollection, SnapshotProduct, SnapshotVariant,
    SqlProductCatalog,
};
pub use memory::{InMemoryProductCatalog, InMemoryShopSettingsRepository};
pub use settings::SqlShopSettingsRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => Self::Persistence(error.to_string()),
            RepositoryError::Decode(message) => Self::Decode(message),
        }
    }
}

impl From<RepositoryError> for CatalogError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(sqlx::Error::PoolTimedOut) => Self::Timeout,
            RepositoryError::Database(error) => Self::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => Self::Decode(message),
        }
    }
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}
