//! Decision procedure tests
//!
//! Drive every phase of the precedence scan from crafted status
//! snapshots, including the abort phases, the one-phase-per-tick rule
//! and the sync gates.

#[cfg(test)]
mod tests {
    use crate::components::ImageCatalog;
    use crate::decide::{Phase, decide_ops};
    use crate::test_utils::*;
    use models::{Cluster, ClusterStatus, Component, EtcdMember, MachineState};

    const CURRENT: u32 = storage::CURRENT_VERSION;

    fn three_one() -> Cluster {
        cluster_with_nodes(vec![
            node("10.0.0.1", true),
            node("10.0.0.2", true),
            node("10.0.0.3", true),
            node("10.0.1.1", false),
        ])
    }

    fn converged(cluster: &Cluster) -> (ClusterStatus, ImageCatalog) {
        let images = ImageCatalog::default();
        let status = converged_status(cluster, &images);
        (status, images)
    }

    #[test]
    fn converged_cluster_is_completed() {
        let cluster = three_one();
        let (status, images) = converged(&cluster);
        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::Completed);
        assert!(decision.ops.is_empty());
    }

    #[test]
    fn decision_is_idempotent_for_the_same_snapshot() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        status
            .nodes
            .get_mut("10.0.0.2")
            .unwrap()
            .services
            .remove(&Component::ApiServer);

        let first = decide_ops(&cluster, &status, CURRENT, &images);
        let second = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(first.phase, second.phase);
        assert_eq!(first.op_names(), second.op_names());
    }

    #[test]
    fn upgrade_runs_first_and_aborts_on_unreachable_control_plane() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);

        let decision = decide_ops(&cluster, &status, CURRENT - 1, &images);
        assert_eq!(decision.phase, Phase::Upgrade);
        assert_eq!(decision.op_names(), vec!["upgrade"]);

        status.nodes.get_mut("10.0.0.3").unwrap().reachable = false;
        let decision = decide_ops(&cluster, &status, CURRENT - 1, &images);
        assert_eq!(decision.phase, Phase::UpgradeAborted);
        assert!(decision.ops.is_empty());
    }

    #[test]
    fn proxies_starve_kubernetes_components() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        let services = &mut status.nodes.get_mut("10.0.1.1").unwrap().services;
        services.remove(&Component::ApiProxy);
        status
            .nodes
            .get_mut("10.0.0.1")
            .unwrap()
            .services
            .remove(&Component::ApiServer);

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::Proxy);
        assert_eq!(decision.op_names(), vec!["apiproxy-boot"]);
    }

    #[test]
    fn etcd_boot_requires_every_control_plane_node() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        status.etcd.initialized = false;
        for n in status.nodes.values_mut() {
            n.etcd_has_data = false;
        }

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::EtcdBoot);
        assert_eq!(decision.op_names(), vec!["etcd-bootstrap"]);

        status.nodes.get_mut("10.0.0.2").unwrap().reachable = false;
        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::EtcdBootAborted);
        assert!(decision.ops.is_empty());
    }

    #[test]
    fn stopped_member_is_started_before_anything_else_etcd() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        status
            .nodes
            .get_mut("10.0.0.2")
            .unwrap()
            .services
            .get_mut(&Component::Etcd)
            .unwrap()
            .running = false;

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::EtcdStart);
        assert_eq!(decision.op_names(), vec!["etcd-start"]);
        assert_eq!(decision.ops[0].targets(), vec!["10.0.0.2"]);
    }

    #[test]
    fn unhealthy_etcd_blocks_later_phases() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        status.etcd.is_healthy = false;
        // Even with a stopped apiserver, the wait wins
        status
            .nodes
            .get_mut("10.0.0.1")
            .unwrap()
            .services
            .remove(&Component::ApiServer);

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::EtcdWait);
        assert_eq!(decision.op_names(), vec!["etcd-wait-cluster"]);
    }

    #[test]
    fn kubernetes_components_boot_in_component_order() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        status
            .nodes
            .get_mut("10.0.1.1")
            .unwrap()
            .services
            .remove(&Component::Kubelet);
        status
            .nodes
            .get_mut("10.0.0.1")
            .unwrap()
            .services
            .remove(&Component::ApiServer);

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::K8sStart);
        assert_eq!(decision.op_names(), vec!["apiserver-boot", "kubelet-boot"]);
    }

    #[test]
    fn orphan_members_are_removed_only_when_control_plane_is_observable() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        status.etcd.members.insert(
            "10.9.9.9".to_string(),
            EtcdMember {
                id: 99,
                name: "orphan".to_string(),
                peer_urls: vec!["https://10.9.9.9:2380".to_string()],
            },
        );
        status.etcd.in_sync.insert("10.9.9.9".to_string(), false);

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::EtcdMaintain);
        assert_eq!(decision.op_names(), vec!["etcd-remove-member"]);

        // An unreachable control-plane node suspends etcd maintenance
        status.nodes.get_mut("10.0.0.3").unwrap().reachable = false;
        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_ne!(decision.phase, Phase::EtcdMaintain);
    }

    #[test]
    fn member_on_a_worker_is_destroyed_not_stopped() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        status.etcd.members.insert(
            "10.0.1.1".to_string(),
            EtcdMember {
                id: 7,
                name: "10.0.1.1".to_string(),
                peer_urls: vec!["https://10.0.1.1:2380".to_string()],
            },
        );
        status.etcd.in_sync.insert("10.0.1.1".to_string(), true);

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::EtcdMaintain);
        assert_eq!(decision.op_names(), vec!["etcd-destroy-member"]);
        assert_eq!(decision.ops[0].targets(), vec!["10.0.1.1"]);
    }

    #[test]
    fn half_added_member_is_readded() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        status.etcd.members.get_mut("10.0.0.3").unwrap().name = String::new();

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::EtcdMaintain);
        assert_eq!(decision.op_names(), vec!["etcd-readd-member"]);
    }

    #[test]
    fn new_member_addition_waits_for_sync() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        status.etcd.members.remove("10.0.0.3");
        status.etcd.in_sync.remove("10.0.0.3");

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::EtcdMaintain);
        assert_eq!(decision.op_names(), vec!["etcd-add-member"]);
        assert_eq!(decision.ops[0].targets(), vec!["10.0.0.3"]);

        // A lagging member holds the addition back
        status.etcd.in_sync.insert("10.0.0.2".to_string(), false);
        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_ne!(decision.phase, Phase::EtcdMaintain);
    }

    #[test]
    fn outdated_members_restart_one_at_a_time() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        for addr in ["10.0.0.1", "10.0.0.2"] {
            status
                .nodes
                .get_mut(addr)
                .unwrap()
                .services
                .get_mut(&Component::Etcd)
                .unwrap()
                .image = "quay.io/coreos/etcd:v3.4.0".to_string();
        }

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::EtcdMaintain);
        assert_eq!(decision.op_names(), vec!["etcd-restart"]);
        assert_eq!(decision.ops[0].targets().len(), 1);
    }

    #[test]
    fn dns_drift_is_cluster_object_maintenance() {
        let mut cluster = three_one();
        cluster.options.dns_servers = vec!["1.1.1.1".to_string()];
        let images = ImageCatalog::default();
        let mut status = converged_status(&cluster, &images);
        status.kubernetes.dns_servers = Some(vec!["8.8.8.8".to_string()]);

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::K8sMaintain);
        assert_eq!(decision.op_names(), vec!["dns-config-update"]);
    }

    #[test]
    fn missing_static_resource_is_applied() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        status
            .kubernetes
            .resource_versions
            .remove("ClusterRole/default/metalops:node-bootstrapper");

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::K8sMaintain);
        assert_eq!(decision.op_names(), vec!["resource-apply"]);
    }

    #[test]
    fn stale_and_drifted_node_objects_are_fixed() {
        let mut cluster = three_one();
        let images = ImageCatalog::default();
        let mut status = converged_status(&cluster, &images);
        // A node object for a machine that left the cluster
        status.kubernetes.nodes.push(models::NodeResource {
            name: "10.9.9.9".to_string(),
            ..Default::default()
        });
        // And the worker machine went unhealthy since the last sync
        cluster.nodes[3].retaint(MachineState::Unhealthy);

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::K8sMaintain);
        assert_eq!(decision.op_names(), vec!["node-update", "node-remove"]);
    }

    #[test]
    fn backup_objects_follow_the_enabled_flag() {
        let mut cluster = three_one();
        cluster.options.backup.enabled = true;
        cluster.options.backup.pvc_name = "backup-pvc".to_string();
        let images = ImageCatalog::default();
        let status = converged_status(&cluster, &images);

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::K8sMaintain);
        assert_eq!(decision.op_names(), vec!["etcd-backup-configure"]);

        // Disabled but objects linger: remove them
        cluster.options.backup.enabled = false;
        let mut status = converged_status(&cluster, &images);
        status.kubernetes.backup.cronjob_schedule = Some("0 3 * * *".to_string());
        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.op_names(), vec!["etcd-backup-remove"]);
    }

    #[test]
    fn demoted_node_is_decommissioned_last() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        // The worker used to be a control plane; a scheduler container
        // lingers there, stopped.
        status.nodes.get_mut("10.0.1.1").unwrap().services.insert(
            Component::KubeScheduler,
            models::ServiceStatus {
                running: false,
                ..Default::default()
            },
        );

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::Decommission);
        assert_eq!(decision.op_names(), vec!["kube-scheduler-decommission"]);
        assert_eq!(decision.ops[0].targets(), vec!["10.0.1.1"]);
    }

    #[test]
    fn one_phase_per_tick() {
        let cluster = three_one();
        let (mut status, images) = converged(&cluster);
        // Both an etcd orphan and DNS drift exist; only the earlier
        // phase's work is returned.
        status.etcd.members.insert(
            "10.9.9.9".to_string(),
            EtcdMember {
                id: 99,
                name: "orphan".to_string(),
                peer_urls: vec!["https://10.9.9.9:2380".to_string()],
            },
        );
        status.etcd.in_sync.insert("10.9.9.9".to_string(), false);
        status.kubernetes.dns_servers = Some(vec!["8.8.8.8".to_string()]);

        let decision = decide_ops(&cluster, &status, CURRENT, &images);
        assert_eq!(decision.phase, Phase::EtcdMaintain);
        assert_eq!(decision.op_names(), vec!["etcd-remove-member"]);
    }
}
