//! Cluster status collection
//!
//! Assembles the per-tick [`ClusterStatus`] snapshot: node probes fan out
//! in parallel (one task per node, joined before proceeding), then the
//! etcd member view and the Kubernetes-observed object state are layered
//! on top. The snapshot is read-only and discarded after the tick.

use crate::infra::Infra;
use crate::ops::resource;
use futures::future::join_all;
use models::{Cluster, ClusterStatus, Component, EtcdStatus, KubernetesStatus, Node, NodeStatus, ServiceStatus};
use models::{Mount, ServiceParams};
use std::collections::BTreeMap;
use tracing::{debug, warn};

fn health_path(component: Component) -> &'static str {
    match component {
        Component::Etcd => "/health",
        Component::ApiServer => "/livez",
        Component::ApiProxy | Component::EtcdProxy => "/health",
        _ => "/healthz",
    }
}

/// Split observed container arguments into built-in and extra parameter
/// sets, using the extras configured for the component.
fn split_params(
    args: &[String],
    binds: &[Mount],
    env: &BTreeMap<String, String>,
    configured_extra: &ServiceParams,
) -> (ServiceParams, ServiceParams) {
    let built_in = ServiceParams {
        extra_args: args
            .iter()
            .filter(|a| !configured_extra.extra_args.contains(a))
            .cloned()
            .collect(),
        extra_binds: binds
            .iter()
            .filter(|b| !configured_extra.extra_binds.contains(b))
            .cloned()
            .collect(),
        extra_env: BTreeMap::new(),
    };
    let observed_extra = ServiceParams {
        extra_args: args
            .iter()
            .filter(|a| configured_extra.extra_args.contains(a))
            .cloned()
            .collect(),
        extra_binds: binds
            .iter()
            .filter(|b| configured_extra.extra_binds.contains(b))
            .cloned()
            .collect(),
        extra_env: env.clone(),
    };
    (built_in, observed_extra)
}

async fn collect_node(node: &Node, cluster: &Cluster, infra: &Infra) -> (String, NodeStatus) {
    let addr = node.address.clone();
    if infra.agent.ping(&addr).await.is_err() {
        debug!("Node {} did not answer the status probe", addr);
        return (addr, NodeStatus::default());
    }

    let mut services = BTreeMap::new();
    // Inspect every component on every node: control-plane-only services
    // found on workers feed the decommission phase.
    for component in Component::all() {
        let state = match infra.agent.inspect(&addr, component.name()).await {
            Ok(Some(state)) => state,
            Ok(None) => continue,
            Err(e) => {
                warn!("Inspect of {} on {} failed: {}", component, addr, e);
                continue;
            }
        };
        let healthy = state.running
            && infra
                .agent
                .http_health(&addr, component.health_port(), health_path(component))
                .await
                .unwrap_or(false);
        let configured_extra = cluster.component_params(component.name());
        let (built_in_params, extra_params) =
            split_params(&state.args, &state.binds, &state.env, &configured_extra);
        services.insert(
            component,
            ServiceStatus {
                running: state.running,
                healthy,
                image: state.image,
                built_in_params,
                extra_params,
            },
        );
    }

    let etcd_has_data = infra
        .agent
        .path_exists(&addr, &cluster.options.etcd.data_dir)
        .await
        .unwrap_or(false);

    (
        addr,
        NodeStatus {
            reachable: true,
            etcd_has_data,
            services,
        },
    )
}

async fn collect_etcd(cluster: &Cluster, infra: &Infra, initialized: bool) -> EtcdStatus {
    let cp_addrs: Vec<String> = cluster
        .control_plane_nodes()
        .map(|n| n.address.clone())
        .collect();

    let members = match infra.etcd.member_list(&cp_addrs).await {
        Ok(m) => m,
        Err(e) => {
            debug!("etcd member list unavailable: {}", e);
            return EtcdStatus {
                initialized,
                ..Default::default()
            };
        }
    };

    // Probe health across every known member, not just the desired
    // control plane, so stragglers on demoted nodes still report sync.
    let mut probe_addrs: Vec<String> = members.keys().cloned().collect();
    probe_addrs.sort();
    let health = match infra.etcd.cluster_health(&probe_addrs).await {
        Ok(h) => h,
        Err(e) => {
            debug!("etcd health probe failed: {}", e);
            Default::default()
        }
    };

    EtcdStatus {
        initialized,
        is_healthy: health.healthy,
        members,
        in_sync: health.in_sync,
    }
}

async fn collect_kubernetes(infra: &Infra) -> KubernetesStatus {
    if !infra.kube.is_ready().await {
        return KubernetesStatus::default();
    }
    let mut status = KubernetesStatus {
        is_ready: true,
        ..Default::default()
    };

    match infra.kube.list_nodes().await {
        Ok(nodes) => status.nodes = nodes,
        Err(e) => warn!("Listing Kubernetes nodes failed: {}", e),
    }

    match infra
        .kube
        .get_configmap(resource::NAMESPACE_SYSTEM, resource::DNS_CONFIGMAP)
        .await
    {
        Ok(data) => {
            status.dns_servers = data.and_then(|d| d.get("servers").cloned()).map(|s| {
                s.lines()
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            });
        }
        Err(e) => warn!("Reading DNS ConfigMap failed: {}", e),
    }

    match infra.kube.get_endpoints("default", "kubernetes").await {
        Ok(ep) => status.apiserver_endpoints = ep,
        Err(e) => warn!("Reading kubernetes Endpoints failed: {}", e),
    }
    match infra
        .kube
        .get_endpoints(resource::NAMESPACE_SYSTEM, resource::ETCD_ENDPOINTS)
        .await
    {
        Ok(ep) => status.etcd_endpoints = ep,
        Err(e) => warn!("Reading etcd Endpoints failed: {}", e),
    }

    for manifest in resource::static_resources() {
        let (kind, namespace, name) = resource::manifest_key(&manifest);
        match infra
            .kube
            .get_manifest_revision(&kind, &namespace, &name)
            .await
        {
            Ok(Some(rev)) => {
                status
                    .resource_versions
                    .insert(format!("{}/{}/{}", kind, namespace, name), rev);
            }
            Ok(None) => {}
            Err(e) => warn!("Reading revision of {}/{} failed: {}", kind, name, e),
        }
    }

    let ns = resource::NAMESPACE_SYSTEM;
    status.backup.configmap = infra
        .kube
        .resource_exists("ConfigMap", ns, resource::BACKUP_NAME)
        .await
        .unwrap_or(false);
    status.backup.secret = infra
        .kube
        .resource_exists("Secret", ns, resource::BACKUP_NAME)
        .await
        .unwrap_or(false);
    status.backup.service = infra
        .kube
        .resource_exists("Service", ns, resource::BACKUP_NAME)
        .await
        .unwrap_or(false);
    status.backup.cronjob_schedule = infra
        .kube
        .get_cronjob_schedule(ns, resource::BACKUP_NAME)
        .await
        .unwrap_or(None);

    status
}

/// Observe the whole cluster for one tick.
pub async fn collect_status(cluster: &Cluster, infra: &Infra) -> ClusterStatus {
    let node_futures = cluster
        .nodes
        .iter()
        .map(|n| collect_node(n, cluster, infra));
    let nodes: std::collections::HashMap<String, NodeStatus> =
        join_all(node_futures).await.into_iter().collect();

    let initialized = nodes.values().any(|n| n.etcd_has_data);
    let etcd = collect_etcd(cluster, infra, initialized).await;
    let kubernetes = collect_kubernetes(infra).await;

    ClusterStatus {
        nodes,
        etcd,
        kubernetes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_params_partitions_by_configured_extras() {
        let configured = ServiceParams {
            extra_args: vec!["--x=1".to_string()],
            ..Default::default()
        };
        let args = vec!["--a".to_string(), "--x=1".to_string()];
        let (built_in, extra) = split_params(&args, &[], &BTreeMap::new(), &configured);
        assert_eq!(built_in.extra_args, vec!["--a"]);
        assert_eq!(extra.extra_args, vec!["--x=1"]);
    }
}
