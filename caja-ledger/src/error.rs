//! Error types for the caja ledger

use thiserror::Error;

/// Result type for caja ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Caja ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Bad amount, missing receipt, malformed identifier
    #[error("Validation error: {0}")]
    Validation(String),

    /// Cut requested with no outstanding debt, or a cut is already pending
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Charge attempted while a cash cut is pending
    #[error("Blocked: {0}")]
    Blocked(String),

    /// Unknown debt, deposit or cut
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invariant violation (coverage bounds, money conservation, journal chain)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable reason code surfaced to callers at the boundary
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Conflict(_) => "conflict",
            Error::Blocked(_) => "blocked",
            Error::NotFound(_) => "not_found",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::Concurrency(_) => "concurrency",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }

    /// Whether the caller can fix the request and retry
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Conflict(_) | Error::Blocked(_) | Error::NotFound(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
