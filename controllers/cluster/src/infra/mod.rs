//! Infrastructure seams
//!
//! The trait boundary between the engine and the outside world: the node
//! agents, the managed etcd cluster and the Kubernetes API. Production
//! implementations live in the submodules; tests swap in the mocks from
//! `test_utils`.

pub mod etcd;
pub mod kube;

use crate::components::ImageCatalog;
use crate::error::ControllerError;
use agent_client::AgentApi;
use models::{EtcdMember, NodeResource};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use storage::StorageError;

/// Annotation carrying the revision of an applied static resource.
pub const REVISION_ANNOTATION: &str = "metalops.io/revision";

/// Health view of the managed etcd cluster.
#[derive(Debug, Clone, Default)]
pub struct EtcdHealth {
    pub healthy: bool,
    /// Per-address in-sync flag (raft index within the slack window)
    pub in_sync: HashMap<String, bool>,
}

/// Administration of the managed etcd cluster. Every call takes the
/// current control-plane addresses; the implementation is stateless so a
/// changed member set never talks to a stale endpoint list.
#[async_trait::async_trait]
pub trait EtcdAdminApi: Send + Sync {
    /// Members keyed by node address (from the peer URL host).
    async fn member_list(
        &self,
        endpoints: &[String],
    ) -> Result<HashMap<String, EtcdMember>, ControllerError>;

    async fn add_member(&self, endpoints: &[String], peer_url: &str)
    -> Result<(), ControllerError>;

    async fn remove_member(&self, endpoints: &[String], id: u64) -> Result<(), ControllerError>;

    /// Cluster health plus per-member sync state.
    async fn cluster_health(&self, endpoints: &[String]) -> Result<EtcdHealth, ControllerError>;
}

/// The slice of the Kubernetes API the engine drives.
#[async_trait::async_trait]
pub trait KubeApi: Send + Sync {
    /// Whether the API server currently answers.
    async fn is_ready(&self) -> bool;

    async fn list_nodes(&self) -> Result<Vec<NodeResource>, ControllerError>;

    /// Replace a Node object's labels, annotations and taints.
    async fn update_node(&self, node: &NodeResource) -> Result<(), ControllerError>;

    async fn delete_node(&self, name: &str) -> Result<(), ControllerError>;

    async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ControllerError>;

    async fn apply_configmap(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError>;

    /// Addresses currently listed in an Endpoints object.
    async fn get_endpoints(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Vec<String>>, ControllerError>;

    async fn apply_endpoints(
        &self,
        namespace: &str,
        name: &str,
        addresses: &[String],
        port: u16,
    ) -> Result<(), ControllerError>;

    /// Server-side apply of an arbitrary manifest.
    async fn apply_manifest(&self, manifest: &serde_json::Value) -> Result<(), ControllerError>;

    async fn delete_resource(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError>;

    async fn resource_exists(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ControllerError>;

    /// The `metalops.io/revision` annotation of an applied resource.
    async fn get_manifest_revision(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ControllerError>;

    /// The schedule of a CronJob, if it exists.
    async fn get_cronjob_schedule(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ControllerError>;
}

/// Config-schema migration seam used by the upgrade operator.
#[async_trait::async_trait]
pub trait VersionStore: Send + Sync {
    async fn migrate(&self) -> Result<(), StorageError>;
}

#[async_trait::async_trait]
impl VersionStore for storage::Storage {
    async fn migrate(&self) -> Result<(), StorageError> {
        storage::Storage::migrate(self).await
    }
}

/// Everything a commander may touch, assembled once per controller run.
#[derive(Clone)]
pub struct Infra {
    pub agent: Arc<dyn AgentApi>,
    pub etcd: Arc<dyn EtcdAdminApi>,
    pub kube: Arc<dyn KubeApi>,
    pub version: Arc<dyn VersionStore>,
    /// Immutable image table for this run
    pub images: ImageCatalog,
}

impl std::fmt::Debug for Infra {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Infra")
            .field("images", &self.images)
            .finish_non_exhaustive()
    }
}
