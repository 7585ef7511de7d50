//! Controller-specific error types.
//!
//! One error enum for the whole engine. A `Command` error ends the
//! current tick without escalating: the next tick recomputes the desired
//! operations from fresh status and may retry, pick a different remedy,
//! or find the precondition gone.

use agent_client::AgentError;
use inventory_client::InventoryError;
use storage::StorageError;
use thiserror::Error;

use crate::scheduler::SchedulerError;

/// Errors that can occur in the cluster controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Node agent error
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// Inventory service error
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Persistence layer error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Managed etcd administration error
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    /// Machine scheduling failed
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Stored constraints are unsatisfiable
    #[error("constraints error: {0}")]
    Constraints(#[from] models::ConstraintsError),

    /// A remote command failed; recorded on the audit record
    #[error("command failed: {0}")]
    Command(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
