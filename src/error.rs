//! Crate-wide error taxonomy.
//!
//! `StoreError` is what the Record Store Adapter returns; `HandlerError` is the
//! client-facing taxonomy from spec §7, each variant carrying the human-readable
//! string that ends up in an `Error` envelope's `error` field.

use thiserror::Error;

/// Errors returned by a [`crate::store::RecordStore`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("record store operation timed out")]
    Timeout,
    #[error("record store backend error: {0}")]
    Backend(String),
}

/// Client-facing error categories (spec §7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    MalformedEnvelope(String),
    #[error("Unknown message type")]
    UnknownType,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Capacity(String),
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("{0}")]
    Store(String),
    #[error("Server is shutting down")]
    ShuttingDown,
}

impl HandlerError {
    /// The human-readable message placed in the `Error` envelope payload.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => HandlerError::NotFound("No such network".to_string()),
            StoreError::Conflict => HandlerError::Conflict("Record already exists".to_string()),
            StoreError::Timeout => HandlerError::Store("Record store timed out".to_string()),
            StoreError::Backend(msg) => HandlerError::Store(msg),
        }
    }
}
