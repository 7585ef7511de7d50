//! Observed cluster status
//!
//! A per-tick snapshot assembled by the status collector: per-node service
//! state, the etcd member view, and the Kubernetes-observed object state.
//! Read-only and discarded after every reconciliation tick.

use crate::cluster::ServiceParams;
use crate::component::Component;
use k8s_openapi::api::core::v1::Taint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Observed state of one managed container on one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub running: bool,
    pub healthy: bool,
    #[serde(default)]
    pub image: String,
    /// Parameters the container was actually started with
    #[serde(default)]
    pub built_in_params: ServiceParams,
    /// User-supplied extra parameters observed on the container
    #[serde(default)]
    pub extra_params: ServiceParams,
}

/// Observed state of one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub reachable: bool,
    /// Whether the etcd data directory exists on this node
    #[serde(default)]
    pub etcd_has_data: bool,
    #[serde(default)]
    pub services: BTreeMap<Component, ServiceStatus>,
}

impl NodeStatus {
    pub fn service(&self, c: Component) -> Option<&ServiceStatus> {
        self.services.get(&c)
    }
}

/// One member of the managed etcd cluster, keyed by node address.
/// A member whose name is empty was added to the member list but its
/// process never joined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EtcdMember {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub peer_urls: Vec<String>,
}

/// Observed state of the managed etcd cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EtcdStatus {
    /// True once any member has on-disk data (the cluster was booted)
    pub initialized: bool,
    /// Cluster-level health as reported by the members
    pub is_healthy: bool,
    /// Members keyed by node address
    #[serde(default)]
    pub members: HashMap<String, EtcdMember>,
    /// Per-address in-sync flag (raft index within the slack window)
    #[serde(default)]
    pub in_sync: HashMap<String, bool>,
}

impl EtcdStatus {
    /// True when the cluster is healthy and every known member is in sync.
    pub fn is_good(&self) -> bool {
        self.is_healthy && self.members.keys().all(|a| self.in_sync.get(a).copied().unwrap_or(false))
    }
}

/// A Kubernetes Node object as observed through the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeResource {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

/// Observed state of the etcd-backup object set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackupObjects {
    pub configmap: bool,
    pub secret: bool,
    pub service: bool,
    /// Schedule of the observed CronJob, if present
    #[serde(default)]
    pub cronjob_schedule: Option<String>,
}

/// Kubernetes-observed object state used by cluster-object maintenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesStatus {
    /// Whether the API server answered the readiness probe
    pub is_ready: bool,
    #[serde(default)]
    pub nodes: Vec<NodeResource>,
    /// Upstream DNS servers found in the cluster DNS ConfigMap
    #[serde(default)]
    pub dns_servers: Option<Vec<String>>,
    /// Addresses in the API-server Endpoints object
    #[serde(default)]
    pub apiserver_endpoints: Option<Vec<String>>,
    /// Addresses in the etcd Endpoints object
    #[serde(default)]
    pub etcd_endpoints: Option<Vec<String>>,
    /// Version annotations of applied static resources, keyed by
    /// "kind/namespace/name"
    #[serde(default)]
    pub resource_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub backup: BackupObjects,
}

impl KubernetesStatus {
    pub fn node(&self, name: &str) -> Option<&NodeResource> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// A snapshot of everything observed during one reconciliation tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub nodes: HashMap<String, NodeStatus>,
    #[serde(default)]
    pub etcd: EtcdStatus,
    #[serde(default)]
    pub kubernetes: KubernetesStatus,
}

impl ClusterStatus {
    pub fn node(&self, address: &str) -> Option<&NodeStatus> {
        self.nodes.get(address)
    }

    /// Whether the node answered the status probe this tick.
    pub fn is_reachable(&self, address: &str) -> bool {
        self.nodes.get(address).map(|n| n.reachable).unwrap_or(false)
    }
}
