use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the commerce engine.
///
/// `NotFound`, `Conflict`, `Gone` and `InsufficientFunds` are user-visible outcomes and are
/// never retried internally. `StorageUnavailable` aborts the unit of work and is passed
/// through unchanged so callers can pick their own retry policy.
#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Gone: {0}")]
    Gone(String),
    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Decimal, required: Decimal },
    #[error("Invalid discount percent {0}, expected a value between 0 and 100")]
    InvalidDiscount(i64),
    #[error("Duplicate payment event: {0}")]
    DuplicateEvent(String),
    #[error("Unmatched payment event: {0}")]
    Unmatched(String),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CommerceError {
    pub fn storage(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::StorageUnavailable(err.into())
    }

    /// Outcomes the caller is expected to show to the user rather than retry.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Conflict(_) | Self::Gone(_) | Self::InsufficientFunds { .. }
        )
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for CommerceError {
    fn from(err: rocksdb::Error) -> Self {
        Self::storage(err)
    }
}

impl From<serde_json::Error> for CommerceError {
    fn from(err: serde_json::Error) -> Self {
        Self::storage(err)
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
