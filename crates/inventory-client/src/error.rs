//! Inventory client errors

use thiserror::Error;

/// Errors that can occur when interacting with the inventory API
#[derive(Debug, Error)]
pub enum InventoryError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Inventory API returned an error
    #[error("inventory API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid token, expired, etc.)
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Machine not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., unknown filter predicate)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
