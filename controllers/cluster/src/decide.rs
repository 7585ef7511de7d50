//! Decision procedure
//!
//! Scans a fixed precedence of reconciliation phases and returns the
//! first phase with work to do, as an ordered operator list. At most one
//! phase's operations run per tick; earlier phases starve later ones
//! until satisfied. The phase label is observability-only.

use crate::components::ImageCatalog;
use crate::filter::NodeFilter;
use crate::ops::backup::{BackupConfigureOperator, BackupRemoveOperator};
use crate::ops::decommission::StopComponentOperator;
use crate::ops::etcd::{
    EtcdAddMemberOperator, EtcdBootOperator, EtcdDestroyMemberOperator, EtcdReAddMemberOperator,
    EtcdRemoveMemberOperator, EtcdRestartOperator, EtcdStartOperator, EtcdWaitOperator,
};
use crate::ops::resource::{
    self, DnsConfigOperator, EndpointsOperator, NodeRemoveOperator, NodeUpdateOperator,
    ResourceApplyOperator,
};
use crate::ops::service::{BootServiceOperator, RestartServiceOperator};
use crate::ops::upgrade::UpgradeOperator;
use crate::ops::Operator;
use models::{Cluster, ClusterStatus, Component};

/// Reconciliation phase, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Upgrade,
    UpgradeAborted,
    Proxy,
    EtcdBoot,
    EtcdBootAborted,
    EtcdStart,
    EtcdWait,
    K8sStart,
    EtcdMaintain,
    K8sMaintain,
    Decommission,
    Completed,
}

impl Phase {
    pub const ALL: [Phase; 12] = [
        Phase::Upgrade,
        Phase::UpgradeAborted,
        Phase::Proxy,
        Phase::EtcdBoot,
        Phase::EtcdBootAborted,
        Phase::EtcdStart,
        Phase::EtcdWait,
        Phase::K8sStart,
        Phase::EtcdMaintain,
        Phase::K8sMaintain,
        Phase::Decommission,
        Phase::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Upgrade => "upgrade",
            Phase::UpgradeAborted => "upgrade-aborted",
            Phase::Proxy => "proxy",
            Phase::EtcdBoot => "etcd-boot",
            Phase::EtcdBootAborted => "etcd-boot-aborted",
            Phase::EtcdStart => "etcd-start",
            Phase::EtcdWait => "etcd-wait",
            Phase::K8sStart => "k8s-start",
            Phase::EtcdMaintain => "etcd-maintain",
            Phase::K8sMaintain => "k8s-maintain",
            Phase::Decommission => "decommission",
            Phase::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The work chosen for one tick.
pub struct Decision {
    pub phase: Phase,
    pub ops: Vec<Box<dyn Operator>>,
}

impl Decision {
    fn new(phase: Phase, ops: Vec<Box<dyn Operator>>) -> Self {
        Self { phase, ops }
    }

    pub fn op_names(&self) -> Vec<&'static str> {
        self.ops.iter().map(|o| o.name()).collect()
    }
}

fn proxy_ops(
    filter: &NodeFilter<'_>,
    cluster: &Cluster,
    images: &ImageCatalog,
) -> Vec<Box<dyn Operator>> {
    let mut ops: Vec<Box<dyn Operator>> = vec![];
    for component in [Component::ApiProxy, Component::EtcdProxy] {
        let stopped = filter.stopped_nodes(component);
        if !stopped.is_empty() {
            ops.push(Box::new(BootServiceOperator::new(
                component, &stopped, cluster, images,
            )));
        }
        let outdated = filter.outdated_nodes(component);
        if !outdated.is_empty() {
            ops.push(Box::new(RestartServiceOperator::new(
                component, &outdated, cluster, images,
            )));
        }
    }
    ops
}

fn k8s_start_ops(
    filter: &NodeFilter<'_>,
    cluster: &Cluster,
    images: &ImageCatalog,
) -> Vec<Box<dyn Operator>> {
    let mut ops: Vec<Box<dyn Operator>> = vec![];
    for component in Component::kubernetes_boot_order() {
        let stopped = filter.stopped_nodes(component);
        if !stopped.is_empty() {
            ops.push(Box::new(BootServiceOperator::new(
                component, &stopped, cluster, images,
            )));
        }
        let outdated = filter.outdated_nodes(component);
        if !outdated.is_empty() {
            ops.push(Box::new(RestartServiceOperator::new(
                component, &outdated, cluster, images,
            )));
        }
    }
    ops
}

fn etcd_maintain_ops(
    filter: &NodeFilter<'_>,
    cluster: &Cluster,
    images: &ImageCatalog,
) -> Vec<Box<dyn Operator>> {
    let mut ops: Vec<Box<dyn Operator>> = vec![];
    let (healthy_orphans, unhealthy_orphans) = filter.etcd_non_cluster_members();

    if !unhealthy_orphans.is_empty() {
        let members = unhealthy_orphans
            .iter()
            .map(|m| (member_address(m), m.id))
            .collect();
        ops.push(Box::new(EtcdRemoveMemberOperator::new(cluster, members)));
    }
    for (node, member) in filter.etcd_members_on_workers() {
        ops.push(Box::new(EtcdDestroyMemberOperator::new(
            node, member.id, cluster,
        )));
    }
    for (node, member) in filter.etcd_unstarted_members() {
        ops.push(Box::new(EtcdReAddMemberOperator::new(
            node, member.id, cluster, images,
        )));
    }
    if !ops.is_empty() {
        return ops;
    }

    // Membership growth and rolling restarts wait until every known
    // member is in sync.
    if !filter.etcd_is_good() {
        return ops;
    }
    if let Some(node) = filter.etcd_new_members().first() {
        ops.push(Box::new(EtcdAddMemberOperator::new(node, cluster, images)));
        return ops;
    }
    if !healthy_orphans.is_empty() {
        let members = healthy_orphans
            .iter()
            .map(|m| (member_address(m), m.id))
            .collect();
        ops.push(Box::new(EtcdRemoveMemberOperator::new(cluster, members)));
        return ops;
    }
    if let Some(node) = filter.etcd_outdated_members().first() {
        // One member restart per tick
        ops.push(Box::new(EtcdRestartOperator::new(node, cluster, images)));
    }
    ops
}

fn member_address(member: &models::EtcdMember) -> String {
    member
        .peer_urls
        .first()
        .and_then(|u| u.split_once("://").map(|(_, r)| r))
        .and_then(|r| r.split(':').next())
        .unwrap_or(&member.name)
        .to_string()
}

fn k8s_maintain_ops(
    filter: &NodeFilter<'_>,
    cluster: &Cluster,
    status: &ClusterStatus,
    images: &ImageCatalog,
) -> Vec<Box<dyn Operator>> {
    let mut ops: Vec<Box<dyn Operator>> = vec![];

    let outdated_manifests: Vec<serde_json::Value> = resource::static_resources()
        .into_iter()
        .filter(|m| {
            let (kind, ns, name) = resource::manifest_key(m);
            status
                .kubernetes
                .resource_versions
                .get(&format!("{}/{}/{}", kind, ns, name))
                .map(|v| v != resource::RESOURCE_REVISION)
                .unwrap_or(true)
        })
        .collect();
    if !outdated_manifests.is_empty() {
        ops.push(Box::new(ResourceApplyOperator::new(outdated_manifests)));
    }

    let desired_dns = cluster.options.dns_servers.clone();
    if !desired_dns.is_empty() && status.kubernetes.dns_servers.as_ref() != Some(&desired_dns) {
        ops.push(Box::new(DnsConfigOperator::new(desired_dns)));
    }

    let mut cp_addrs: Vec<String> = cluster
        .control_plane_nodes()
        .map(|n| n.address.clone())
        .collect();
    cp_addrs.sort();
    if status.kubernetes.apiserver_endpoints.as_ref() != Some(&cp_addrs) {
        ops.push(Box::new(EndpointsOperator::apiserver(cp_addrs.clone())));
    }
    if status.kubernetes.etcd_endpoints.as_ref() != Some(&cp_addrs) {
        ops.push(Box::new(EndpointsOperator::etcd(cp_addrs)));
    }

    let drifted = filter.k8s_nodes_outdated();
    if !drifted.is_empty() {
        ops.push(Box::new(NodeUpdateOperator::new(drifted)));
    }
    let stale: Vec<String> = filter
        .k8s_stale_nodes()
        .iter()
        .map(|n| n.name.clone())
        .collect();
    if !stale.is_empty() {
        ops.push(Box::new(NodeRemoveOperator::new(stale)));
    }

    let backup = &cluster.options.backup;
    let observed = &status.kubernetes.backup;
    if backup.enabled {
        let complete = observed.configmap
            && observed.secret
            && observed.service
            && observed.cronjob_schedule.as_deref() == Some(backup.schedule.as_str());
        if !complete {
            ops.push(Box::new(BackupConfigureOperator::new(backup, images)));
        }
    } else {
        let any = observed.configmap
            || observed.secret
            || observed.service
            || observed.cronjob_schedule.is_some();
        if any {
            ops.push(Box::new(BackupRemoveOperator::new()));
        }
    }

    ops
}

fn decommission_ops(filter: &NodeFilter<'_>) -> Vec<Box<dyn Operator>> {
    let mut ops: Vec<Box<dyn Operator>> = vec![];
    for component in [
        Component::ApiServer,
        Component::ControllerManager,
        Component::KubeScheduler,
        Component::EtcdProxy,
    ] {
        let nodes = filter.decommissioned_nodes(component);
        if !nodes.is_empty() {
            ops.push(Box::new(StopComponentOperator::new(component, &nodes)));
        }
    }
    ops
}

/// Decide the next phase and its operator list. Pure with respect to its
/// inputs: calling it twice on the same snapshots yields the same phase
/// and operator names.
pub fn decide_ops(
    cluster: &Cluster,
    status: &ClusterStatus,
    stored_version: u32,
    images: &ImageCatalog,
) -> Decision {
    let filter = NodeFilter::new(cluster, status, images);

    // 1. Upgrade gates everything; an unreachable control-plane node
    //    aborts the tick without other changes.
    if stored_version < storage::CURRENT_VERSION {
        if filter.all_control_plane_reachable() {
            return Decision::new(Phase::Upgrade, vec![Box::new(UpgradeOperator::new())]);
        }
        return Decision::new(Phase::UpgradeAborted, vec![]);
    }

    // 2. Reverse-proxy sidecars
    let ops = proxy_ops(&filter, cluster, images);
    if !ops.is_empty() {
        return Decision::new(Phase::Proxy, ops);
    }

    // 3. One-shot etcd bootstrap
    if !filter.etcd_bootstrapped() {
        if filter.all_control_plane_reachable() {
            return Decision::new(
                Phase::EtcdBoot,
                vec![Box::new(EtcdBootOperator::new(cluster, images))],
            );
        }
        return Decision::new(Phase::EtcdBootAborted, vec![]);
    }

    // 4. Start stopped members, then block until the cluster is healthy
    let stopped = filter.etcd_stopped_members();
    if !stopped.is_empty() {
        return Decision::new(
            Phase::EtcdStart,
            vec![Box::new(EtcdStartOperator::new(&stopped, cluster, images))],
        );
    }
    if !status.etcd.is_healthy {
        return Decision::new(Phase::EtcdWait, vec![Box::new(EtcdWaitOperator::new(cluster))]);
    }

    // 5. Kubernetes components, stopped-first then outdated, in order
    let ops = k8s_start_ops(&filter, cluster, images);
    if !ops.is_empty() {
        return Decision::new(Phase::K8sStart, ops);
    }

    // 6. etcd maintenance needs every control-plane node observable
    if filter.all_control_plane_reachable() {
        let ops = etcd_maintain_ops(&filter, cluster, images);
        if !ops.is_empty() {
            return Decision::new(Phase::EtcdMaintain, ops);
        }
    }

    // 7. Cluster-object maintenance needs a live API server
    if status.kubernetes.is_ready {
        let ops = k8s_maintain_ops(&filter, cluster, status, images);
        if !ops.is_empty() {
            return Decision::new(Phase::K8sMaintain, ops);
        }
    }

    // 8. Stop control-plane leftovers on demoted nodes
    let ops = decommission_ops(&filter);
    if !ops.is_empty() {
        return Decision::new(Phase::Decommission, ops);
    }

    Decision::new(Phase::Completed, vec![])
}
