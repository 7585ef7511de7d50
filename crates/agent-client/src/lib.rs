//! Node Agent REST API Client
//!
//! Client for the agent daemon running on every managed machine. The
//! agent executes the remote side of every reconciliation command:
//! container lifecycle (pull/run/stop/remove/inspect), file writes,
//! path removal and local health probes.
//!
//! Every operation is idempotent: running an already-running container
//! with an identical spec, pulling a present image or removing an absent
//! path are no-ops, which is what makes commands safe to re-run after a
//! crashed tick.
//!
//! # Example
//!
//! ```no_run
//! use agent_client::{AgentApi, AgentClient, ContainerSpec};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = AgentClient::new(9105)?;
//! client.pull_image("10.0.1.4", "ghcr.io/metalops/etcd:3.5.12").await?;
//! let spec = ContainerSpec {
//!     name: "etcd".into(),
//!     image: "ghcr.io/metalops/etcd:3.5.12".into(),
//!     ..Default::default()
//! };
//! client.run_container("10.0.1.4", &spec).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod agent_trait;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use agent_trait::AgentApi;
pub use client::AgentClient;
pub use error::AgentError;
pub use crate::models::{ContainerSpec, ContainerState, FileSpec};

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockAgentClient;
