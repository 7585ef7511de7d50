//! Cluster topology types
//!
//! The Cluster is the single persisted desired-state document: a node
//! template (per-role blueprint), the concrete node list currently in
//! effect, and cluster-wide options. Updates are atomic replacements
//! guarded by an expected-revision check in the storage layer.

use crate::machine::{Machine, MachineState};
use k8s_openapi::api::core::v1::Taint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Taint key stamped onto nodes whose backing machine left the healthy state.
pub const STATE_TAINT_KEY: &str = "metalops.io/state";

/// A bind mount passed to a managed container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Runtime parameters for one managed service: command-line arguments,
/// bind mounts and environment. Compared by the node filter to detect
/// configuration drift.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceParams {
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub extra_binds: Vec<Mount>,
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
}

impl ServiceParams {
    pub fn is_empty(&self) -> bool {
        self.extra_args.is_empty() && self.extra_binds.is_empty() && self.extra_env.is_empty()
    }

    /// Merge `other` into a copy of `self` (arguments appended, mounts
    /// appended, environment overlaid).
    pub fn merged(&self, other: &ServiceParams) -> ServiceParams {
        let mut out = self.clone();
        out.extra_args.extend(other.extra_args.iter().cloned());
        out.extra_binds.extend(other.extra_binds.iter().cloned());
        for (k, v) in &other.extra_env {
            out.extra_env.insert(k.clone(), v.clone());
        }
        out
    }
}

/// A machine bound into the cluster topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Primary IPv4 address, the node identity within the cluster
    pub address: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub control_plane: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

impl Node {
    /// Bind a machine into the cluster using a role template. Template
    /// labels/annotations/taints are stamped on, then the taint derived
    /// from the machine's lifecycle state is appended.
    pub fn from_machine(machine: &Machine, template: &NodeTemplate, control_plane: bool) -> Node {
        let address = machine
            .primary_address()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let mut taints = template.taints.clone();
        if let Some(t) = derived_state_taint(machine.status.state) {
            taints.push(t);
        }
        let mut labels = template.labels.clone();
        labels.insert("metalops.io/rack".to_string(), machine.spec.rack.to_string());
        labels.insert(
            "metalops.io/index-in-rack".to_string(),
            machine.spec.index_in_rack.to_string(),
        );
        labels.insert("metalops.io/role".to_string(), template.role.clone());
        Node {
            address,
            hostname: String::new(),
            control_plane,
            labels,
            annotations: template.annotations.clone(),
            taints,
        }
    }

    /// The role this node was instantiated from, if recorded.
    pub fn role(&self) -> Option<&str> {
        self.labels.get("metalops.io/role").map(String::as_str)
    }

    /// Replace any `metalops.io/state` taint with the one derived from
    /// the given machine state. Returns true when the taint set changed.
    pub fn retaint(&mut self, state: MachineState) -> bool {
        let desired = derived_state_taint(state);
        let current: Vec<Taint> = self
            .taints
            .iter()
            .filter(|t| t.key == STATE_TAINT_KEY)
            .cloned()
            .collect();
        let changed = match (&desired, current.as_slice()) {
            (None, []) => false,
            (Some(d), [c]) => d != c,
            _ => true,
        };
        if changed {
            self.taints.retain(|t| t.key != STATE_TAINT_KEY);
            if let Some(d) = desired {
                self.taints.push(d);
            }
        }
        changed
    }
}

/// Taint derived from a machine lifecycle state. Healthy and transient
/// states carry no taint; unhealthy machines repel new pods; retiring
/// machines evict running ones.
pub fn derived_state_taint(state: MachineState) -> Option<Taint> {
    let (value, effect) = match state {
        MachineState::Unhealthy => ("unhealthy", "NoSchedule"),
        MachineState::Retiring => ("retiring", "NoExecute"),
        MachineState::Retired => ("retired", "NoExecute"),
        _ => return None,
    };
    Some(Taint {
        key: STATE_TAINT_KEY.to_string(),
        value: Some(value.to_string()),
        effect: effect.to_string(),
        time_added: None,
    })
}

/// Per-role node blueprint. Worker templates with weights share the
/// worker population proportionally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    pub role: String,
    #[serde(default)]
    pub control_plane: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

fn default_weight() -> f64 {
    1.0
}

/// Options for the managed etcd cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EtcdOptions {
    /// Host path holding the member data directory
    #[serde(default = "default_etcd_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub params: ServiceParams,
}

fn default_etcd_data_dir() -> String {
    "/var/lib/etcd".to_string()
}

/// Options for the optional etcd backup job set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    #[serde(default)]
    pub enabled: bool,
    /// Cron schedule for the backup job
    #[serde(default = "default_backup_schedule")]
    pub schedule: String,
    /// Number of snapshots to keep
    #[serde(default = "default_backup_rotate")]
    pub rotate: u32,
    /// PersistentVolumeClaim the snapshots are written to
    #[serde(default)]
    pub pvc_name: String,
}

fn default_backup_schedule() -> String {
    "0 3 * * *".to_string()
}

fn default_backup_rotate() -> u32 {
    14
}

/// Cluster-wide options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOptions {
    /// Service cluster IP range handed to the API server
    #[serde(default = "default_service_subnet")]
    pub service_subnet: String,
    /// Upstream DNS servers written into the cluster DNS ConfigMap
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub etcd: EtcdOptions,
    #[serde(default)]
    pub backup: BackupOptions,
    /// Per-component parameter overrides keyed by component name
    #[serde(default)]
    pub components: BTreeMap<String, ServiceParams>,
}

fn default_service_subnet() -> String {
    "10.68.0.0/16".to_string()
}

/// The persisted desired cluster: template, concrete node list, options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub template: Vec<NodeTemplate>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub options: ClusterOptions,
}

impl Cluster {
    pub fn control_plane_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.control_plane)
    }

    pub fn worker_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.control_plane)
    }

    pub fn node(&self, address: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.address == address)
    }

    /// Extra parameters configured for a component, if any.
    pub fn component_params(&self, name: &str) -> ServiceParams {
        self.options.components.get(name).cloned().unwrap_or_default()
    }
}
