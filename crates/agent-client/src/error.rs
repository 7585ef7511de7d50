//! Agent client errors

use thiserror::Error;

/// Errors that can occur when interacting with a node agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Agent returned an error
    #[error("agent error on {addr}: {message}")]
    Api { addr: String, message: String },

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The node did not answer at all
    #[error("node {0} is unreachable")]
    Unreachable(String),

    /// Container or path not found on the node
    #[error("not found on {addr}: {what}")]
    NotFound { addr: String, what: String },
}
