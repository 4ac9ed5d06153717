use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("catalog request timed out")]
    Timeout,
    #[error("catalog returned malformed data: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApplicationError {
    /// Stable tag placed in response envelopes; never carries internals.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Catalog(CatalogError::Timeout) => "catalog_timeout",
            Self::Catalog(_) => "catalog_unavailable",
            Self::Store(_) => "persistence_unavailable",
        }
    }
}
