//! Machine Inventory REST API Client
//!
//! A client library for the datacenter machine-inventory service. The
//! inventory is the source of truth for physical machines: identity,
//! rack position, role hint and lifecycle state. The reconciliation
//! engine queries it once per tick and treats the result as immutable.
//!
//! # Example
//!
//! ```no_run
//! use inventory_client::{InventoryApi, InventoryClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = InventoryClient::new(
//!     "http://inventory:10080".to_string(),
//!     "your-api-token".to_string(),
//! )?;
//!
//! // Healthy control-plane candidates outside rack 3
//! let machines = client
//!     .get_machines(&[
//!         ("state", "healthy"),
//!         ("without-rack", "3"),
//!         ("min-days-before-retire", "90"),
//!     ])
//!     .await?;
//! # let _ = machines;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Filter predicates**: positive (`state`, `rack`, `role`, `label`)
//!   and negative (`without-*`) query parameters
//! - **Pagination**: transparently fetches all pages
//! - **`test-util`**: in-memory [`MockInventoryClient`] implementing the
//!   same trait for unit tests

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod inventory_trait;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::InventoryClient;
pub use error::InventoryError;
pub use inventory_trait::InventoryApi;

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockInventoryClient;
