//! InventoryApi trait for mocking
//!
//! This trait abstracts the inventory client to enable mocking in unit
//! tests. The concrete InventoryClient implements this trait, and tests
//! use the in-memory mock implementation.

use crate::error::InventoryError;
use models::Machine;

/// Trait for inventory API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing
/// runtime.
#[async_trait::async_trait]
pub trait InventoryApi: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Query machines matching filter predicates.
    ///
    /// Supported predicates: `serial`, `rack`, `role`, `state`, `label`
    /// (as `key=value`), `min-days-before-retire`, and the negative
    /// forms `without-rack`, `without-role`, `without-state`,
    /// `without-label`. An empty filter list returns every machine.
    async fn get_machines(
        &self,
        filters: &[(&str, &str)],
    ) -> Result<Vec<Machine>, InventoryError>;

    /// Get a single machine by serial number.
    async fn get_machine(&self, serial: &str) -> Result<Machine, InventoryError>;
}
