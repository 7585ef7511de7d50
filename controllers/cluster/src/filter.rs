//! Node filter
//!
//! A read-only query layer over (Cluster, ClusterStatus) producing the
//! named node and member subsets the decision procedure works from. Pure
//! functions of the two snapshots; no side effects.

use crate::components::{self, ImageCatalog};
use models::{Cluster, ClusterStatus, Component, EtcdMember, Node, NodeResource, ServiceStatus};

/// Taint keys owned by the engine on Kubernetes Node objects.
const MANAGED_TAINT_PREFIX: &str = "metalops.io/";

/// Named node subsets over one (Cluster, ClusterStatus) pair.
#[derive(Debug, Clone, Copy)]
pub struct NodeFilter<'a> {
    cluster: &'a Cluster,
    status: &'a ClusterStatus,
    images: &'a ImageCatalog,
}

impl<'a> NodeFilter<'a> {
    pub fn new(cluster: &'a Cluster, status: &'a ClusterStatus, images: &'a ImageCatalog) -> Self {
        Self {
            cluster,
            status,
            images,
        }
    }

    /// Whether a component belongs on a node at all.
    fn placed_on(component: Component, node: &Node) -> bool {
        !component.control_plane_only() || node.control_plane
    }

    fn service(&self, node: &Node, component: Component) -> Option<&'a ServiceStatus> {
        self.status.node(&node.address)?.service(component)
    }

    pub fn control_plane(&self) -> Vec<&'a Node> {
        self.cluster.control_plane_nodes().collect()
    }

    pub fn workers(&self) -> Vec<&'a Node> {
        self.cluster.worker_nodes().collect()
    }

    pub fn unreachable_nodes(&self) -> Vec<&'a Node> {
        self.cluster
            .nodes
            .iter()
            .filter(|n| !self.status.is_reachable(&n.address))
            .collect()
    }

    pub fn all_control_plane_reachable(&self) -> bool {
        self.cluster
            .control_plane_nodes()
            .all(|n| self.status.is_reachable(&n.address))
    }

    /// Reachable nodes where the component should run but its container
    /// is absent or stopped.
    pub fn stopped_nodes(&self, component: Component) -> Vec<&'a Node> {
        self.cluster
            .nodes
            .iter()
            .filter(|n| Self::placed_on(component, n))
            .filter(|n| self.status.is_reachable(&n.address))
            .filter(|n| !self.service(n, component).map(|s| s.running).unwrap_or(false))
            .collect()
    }

    fn service_outdated(&self, node: &Node, component: Component, svc: &ServiceStatus) -> bool {
        if svc.image != self.images.image(component) {
            return true;
        }
        // First-boot-only flags are legitimately absent from the desired
        // parameters of a restart; strip them from both sides.
        let observed = components::strip_first_boot(component, &svc.built_in_params.extra_args);
        let desired_params = components::desired_params(component, self.cluster, node);
        let desired = components::strip_first_boot(component, &desired_params.extra_args);
        if observed != desired {
            return true;
        }
        let mut observed_binds = svc.built_in_params.extra_binds.clone();
        let mut desired_binds = desired_params.extra_binds;
        observed_binds.sort();
        desired_binds.sort();
        if observed_binds != desired_binds {
            return true;
        }
        svc.extra_params != self.cluster.component_params(component.name())
    }

    /// Reachable nodes running the component with an image or parameter
    /// set differing from the currently-desired built-ins.
    pub fn outdated_nodes(&self, component: Component) -> Vec<&'a Node> {
        self.cluster
            .nodes
            .iter()
            .filter(|n| Self::placed_on(component, n))
            .filter(|n| self.status.is_reachable(&n.address))
            .filter(|n| match self.service(n, component) {
                Some(svc) if svc.running => self.service_outdated(n, component, svc),
                _ => false,
            })
            .collect()
    }

    pub fn etcd_bootstrapped(&self) -> bool {
        self.status.etcd.initialized
    }

    pub fn etcd_is_good(&self) -> bool {
        self.status.etcd.is_good()
    }

    /// Control-plane nodes in the member list whose etcd container is not
    /// running.
    pub fn etcd_stopped_members(&self) -> Vec<&'a Node> {
        self.cluster
            .control_plane_nodes()
            .filter(|n| self.status.etcd.members.contains_key(&n.address))
            .filter(|n| self.status.is_reachable(&n.address))
            .filter(|n| {
                !self
                    .service(n, Component::Etcd)
                    .map(|s| s.running)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Members absent from the cluster entirely, partitioned into
    /// (healthy, unhealthy) by their sync state.
    pub fn etcd_non_cluster_members(&self) -> (Vec<&'a EtcdMember>, Vec<&'a EtcdMember>) {
        let mut healthy = Vec::new();
        let mut unhealthy = Vec::new();
        for (addr, member) in &self.status.etcd.members {
            if self.cluster.node(addr).is_some() {
                continue;
            }
            if self.status.etcd.in_sync.get(addr).copied().unwrap_or(false) {
                healthy.push(member);
            } else {
                unhealthy.push(member);
            }
        }
        healthy.sort_by_key(|m| m.id);
        unhealthy.sort_by_key(|m| m.id);
        (healthy, unhealthy)
    }

    /// Members living on nodes that are no longer control plane. These
    /// must be destroyed (container, data and membership), never merely
    /// stopped.
    pub fn etcd_members_on_workers(&self) -> Vec<(&'a Node, &'a EtcdMember)> {
        let mut out: Vec<(&Node, &EtcdMember)> = self
            .cluster
            .worker_nodes()
            .filter_map(|n| self.status.etcd.members.get(&n.address).map(|m| (n, m)))
            .collect();
        out.sort_by(|a, b| a.0.address.cmp(&b.0.address));
        out
    }

    /// Control-plane members added to the member list but never started:
    /// their member name is still empty. They must be removed and
    /// re-added.
    pub fn etcd_unstarted_members(&self) -> Vec<(&'a Node, &'a EtcdMember)> {
        let mut out: Vec<(&Node, &EtcdMember)> = self
            .cluster
            .control_plane_nodes()
            .filter_map(|n| self.status.etcd.members.get(&n.address).map(|m| (n, m)))
            .filter(|(_, m)| m.name.is_empty())
            .collect();
        out.sort_by(|a, b| a.0.address.cmp(&b.0.address));
        out
    }

    /// Control-plane nodes missing from the member list.
    pub fn etcd_new_members(&self) -> Vec<&'a Node> {
        self.cluster
            .control_plane_nodes()
            .filter(|n| !self.status.etcd.members.contains_key(&n.address))
            .collect()
    }

    /// Control-plane members whose running container is outdated.
    pub fn etcd_outdated_members(&self) -> Vec<&'a Node> {
        self.cluster
            .control_plane_nodes()
            .filter(|n| self.status.etcd.members.contains_key(&n.address))
            .filter(|n| self.status.is_reachable(&n.address))
            .filter(|n| match self.service(n, Component::Etcd) {
                Some(svc) if svc.running => self.service_outdated(n, Component::Etcd, svc),
                _ => false,
            })
            .collect()
    }

    fn desired_node_resource(&self, node: &Node, observed: &NodeResource) -> NodeResource {
        let mut labels = observed.labels.clone();
        for (k, v) in &node.labels {
            labels.insert(k.clone(), v.clone());
        }
        let mut annotations = observed.annotations.clone();
        for (k, v) in &node.annotations {
            annotations.insert(k.clone(), v.clone());
        }
        let mut taints: Vec<_> = observed
            .taints
            .iter()
            .filter(|t| !t.key.starts_with(MANAGED_TAINT_PREFIX))
            .filter(|t| !node.taints.iter().any(|d| d.key == t.key))
            .cloned()
            .collect();
        taints.extend(node.taints.iter().cloned());
        NodeResource {
            name: node.address.clone(),
            labels,
            annotations,
            taints,
        }
    }

    /// Kubernetes Node objects whose labels, annotations or managed
    /// taints drifted from the Node spec, paired with the object to
    /// apply.
    pub fn k8s_nodes_outdated(&self) -> Vec<NodeResource> {
        let mut out = Vec::new();
        for node in &self.cluster.nodes {
            let Some(observed) = self.status.kubernetes.node(&node.address) else {
                continue;
            };
            let desired = self.desired_node_resource(node, observed);
            let mut observed_managed: Vec<_> = observed
                .taints
                .iter()
                .filter(|t| t.key.starts_with(MANAGED_TAINT_PREFIX))
                .cloned()
                .collect();
            let mut desired_managed: Vec<_> = node
                .taints
                .iter()
                .filter(|t| t.key.starts_with(MANAGED_TAINT_PREFIX))
                .cloned()
                .collect();
            observed_managed.sort_by(|a, b| a.key.cmp(&b.key));
            desired_managed.sort_by(|a, b| a.key.cmp(&b.key));
            let drifted = desired.labels != observed.labels
                || desired.annotations != observed.annotations
                || observed_managed != desired_managed;
            if drifted {
                out.push(desired);
            }
        }
        out
    }

    /// Kubernetes Node objects with no cluster counterpart.
    pub fn k8s_stale_nodes(&self) -> Vec<&'a NodeResource> {
        self.status
            .kubernetes
            .nodes
            .iter()
            .filter(|n| self.cluster.node(&n.name).is_none())
            .collect()
    }

    /// Reachable non-control-plane nodes where a control-plane-only
    /// component container still exists.
    pub fn decommissioned_nodes(&self, component: Component) -> Vec<&'a Node> {
        debug_assert!(component.control_plane_only());
        self.cluster
            .worker_nodes()
            .filter(|n| self.status.is_reachable(&n.address))
            .filter(|n| self.service(n, component).is_some())
            .collect()
    }
}
