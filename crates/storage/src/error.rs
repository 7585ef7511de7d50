//! Storage errors

use thiserror::Error;

/// Errors that can occur in the persistence layer
#[derive(Debug, Error)]
pub enum StorageError {
    /// etcd client error
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compare-and-swap failed: the object changed underneath the writer.
    /// Harmless — the caller recomputes from fresh state next tick.
    #[error("conflict: {0} was modified concurrently")]
    Conflict(String),

    /// The requested object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Leadership was lost (lease expired or session invalidated)
    #[error("leadership lost")]
    LeadershipLost,
}
