//! AgentApi trait for mocking
//!
//! Abstracts the node agent so the execution engine and status collector
//! can be tested against an in-memory mock.

use crate::error::AgentError;
use crate::models::{ContainerSpec, ContainerState, FileSpec};

/// Trait for node agent operations. One implementor serves every node;
/// each call takes the target node address.
#[async_trait::async_trait]
pub trait AgentApi: Send + Sync {
    /// Cheap reachability probe.
    async fn ping(&self, addr: &str) -> Result<(), AgentError>;

    /// Pull an image. No-op when the image is already present.
    async fn pull_image(&self, addr: &str, image: &str) -> Result<(), AgentError>;

    /// Start a container. No-op when a container with the same name and
    /// an identical spec is already running; replaces a stopped or
    /// differing container.
    async fn run_container(&self, addr: &str, spec: &ContainerSpec) -> Result<(), AgentError>;

    /// Stop a container, keeping its on-disk state. No-op when absent.
    async fn stop_container(&self, addr: &str, name: &str) -> Result<(), AgentError>;

    /// Stop and remove a container. No-op when absent.
    async fn remove_container(&self, addr: &str, name: &str) -> Result<(), AgentError>;

    /// Inspect a container; `None` when it does not exist.
    async fn inspect(&self, addr: &str, name: &str)
    -> Result<Option<ContainerState>, AgentError>;

    /// Write files atomically with the given modes.
    async fn write_files(&self, addr: &str, files: &[FileSpec]) -> Result<(), AgentError>;

    /// Recursively remove a path. No-op when absent.
    async fn remove_path(&self, addr: &str, path: &str) -> Result<(), AgentError>;

    /// Whether a path exists on the node.
    async fn path_exists(&self, addr: &str, path: &str) -> Result<bool, AgentError>;

    /// Probe an HTTP health endpoint bound to localhost on the node.
    async fn http_health(&self, addr: &str, port: u16, path: &str) -> Result<bool, AgentError>;
}
