//! Machine scheduler tests

#[cfg(test)]
mod tests {
    use crate::scheduler::{self, Outcome, SchedulerConfig, SchedulerError};
    use crate::test_utils::*;
    use models::{Cluster, MachineState, Node, NodeTemplate};
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
    }

    fn base_cluster() -> Cluster {
        cluster_with_nodes(vec![])
    }

    fn addr(rack: u8, host: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, rack, host)
    }

    fn changed(outcome: Outcome) -> (Cluster, Vec<String>) {
        match outcome {
            Outcome::Changed { cluster, changes } => (cluster, changes),
            Outcome::Unchanged => panic!("expected a changed cluster"),
        }
    }

    #[test]
    fn generate_honors_counts_and_rack_diversity() {
        // 3 machines in rack 1, 2 in rack 2, no previous cluster
        let machines = vec![
            machine_at("a1", addr(1, 1), 1, MachineState::Healthy),
            machine_at("a2", addr(1, 2), 1, MachineState::Healthy),
            machine_at("a3", addr(1, 3), 1, MachineState::Healthy),
            machine_at("b1", addr(2, 1), 2, MachineState::Healthy),
            machine_at("b2", addr(2, 2), 2, MachineState::Healthy),
        ];
        let (cluster, changes) = scheduler::generate(
            &base_cluster(),
            &constraints(3, 2, None),
            &machines,
            test_now(),
            &config(),
        )
        .unwrap();

        assert_eq!(cluster.control_plane_nodes().count(), 3);
        assert_eq!(cluster.worker_nodes().count(), 2);
        // Once rack 1 holds a member, its count penalty makes rack 2
        // preferable for the next slot.
        assert!(
            cluster
                .control_plane_nodes()
                .any(|n| n.address.starts_with("10.0.2.")),
            "no control-plane node landed in rack 2: {:?}",
            changes
        );
        assert_eq!(changes.len(), 5);
        assert!(changes[0].starts_with("add new control plane:"));
    }

    #[test]
    fn generate_fails_without_enough_machines() {
        let machines = vec![machine_at("a1", addr(1, 1), 1, MachineState::Healthy)];
        let err = scheduler::generate(
            &base_cluster(),
            &constraints(3, 0, None),
            &machines,
            test_now(),
            &config(),
        )
        .unwrap_err();
        assert_eq!(err, SchedulerError::NoControlPlaneCandidate);
    }

    #[test]
    fn unreachable_removal_is_quorum_guarded() {
        let mut machines = vec![
            machine_at("a1", addr(1, 1), 1, MachineState::Healthy),
            machine_at("a2", addr(1, 2), 1, MachineState::Healthy),
            machine_at("a3", addr(1, 3), 1, MachineState::Healthy),
        ];
        let prev = {
            let mut c = base_cluster();
            c.nodes = machines
                .iter()
                .map(|m| Node::from_machine(m, &templates()[0], true))
                .collect();
            c
        };

        // One of three unreachable: a strict majority remains, removal ok
        machines[2].status.state = MachineState::Unreachable;
        let (cluster, changes) = changed(
            scheduler::update(&prev, &constraints(3, 0, None), &machines, test_now(), &config())
                .unwrap(),
        );
        assert_eq!(cluster.control_plane_nodes().count(), 2);
        assert_eq!(changes, vec!["remove unreachable machine: 10.0.1.3"]);

        // Two of three unreachable: the pass must fail with no change
        machines[1].status.state = MachineState::Unreachable;
        let err = scheduler::update(
            &prev,
            &constraints(3, 0, None),
            &machines,
            test_now(),
            &config(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SchedulerError::QuorumBreak {
                remaining: 1,
                total: 3
            }
        );
    }

    #[test]
    fn vanished_machines_count_as_unreachable() {
        let machines = vec![machine_at("a1", addr(1, 1), 1, MachineState::Healthy)];
        let prev = {
            let mut c = base_cluster();
            c.nodes = vec![
                Node::from_machine(&machines[0], &templates()[0], true),
                // This node's machine is gone from the inventory
                node("10.0.9.9", false),
            ];
            c
        };
        let (cluster, changes) = changed(
            scheduler::update(&prev, &constraints(1, 0, None), &machines, test_now(), &config())
                .unwrap(),
        );
        assert_eq!(cluster.nodes.len(), 1);
        assert_eq!(changes, vec!["remove unreachable machine: 10.0.9.9"]);
    }

    #[test]
    fn replace_unhealthy_control_plane_with_unused_machine() {
        // Previous cluster has 3 control planes, one now unhealthy; a
        // healthy unused machine exists.
        let mut machines = vec![
            machine_at("a1", addr(1, 1), 1, MachineState::Healthy),
            machine_at("a2", addr(1, 2), 1, MachineState::Healthy),
            machine_at("a3", addr(1, 3), 1, MachineState::Healthy),
            machine_at("spare", addr(2, 1), 2, MachineState::Healthy),
        ];
        let prev = {
            let mut c = base_cluster();
            c.nodes = machines[..3]
                .iter()
                .map(|m| Node::from_machine(m, &templates()[0], true))
                .collect();
            c
        };
        machines[1].status.state = MachineState::Unhealthy;

        let (cluster, changes) = changed(
            scheduler::update(&prev, &constraints(3, 0, None), &machines, test_now(), &config())
                .unwrap(),
        );
        assert_eq!(cluster.control_plane_nodes().count(), 3);
        assert!(
            cluster
                .control_plane_nodes()
                .all(|n| n.address != "10.0.1.2"),
            "unhealthy member kept its seat: {:?}",
            changes
        );
        assert!(changes.iter().any(|c| c == "demote a control plane: 10.0.1.2"));
        assert!(changes.iter().any(|c| c == "add new control plane: 10.0.2.1"));
    }

    #[test]
    fn unhealthy_control_plane_without_replacement_is_kept() {
        let mut machines = vec![
            machine_at("a1", addr(1, 1), 1, MachineState::Healthy),
            machine_at("a2", addr(1, 2), 1, MachineState::Healthy),
        ];
        let prev = {
            let mut c = base_cluster();
            c.nodes = machines
                .iter()
                .map(|m| Node::from_machine(m, &templates()[0], true))
                .collect();
            c
        };
        machines[1].status.state = MachineState::Unhealthy;
        // No spare machine and no worker: the only change is the taint
        let (cluster, changes) = changed(
            scheduler::update(&prev, &constraints(2, 0, None), &machines, test_now(), &config())
                .unwrap(),
        );
        assert_eq!(changes, vec!["retaint: 10.0.1.2"]);
        assert_eq!(cluster.control_plane_nodes().count(), 2);
    }

    #[test]
    fn control_plane_growth_promotes_a_worker_when_no_machine_is_free() {
        let machines = vec![
            machine_at("a1", addr(1, 1), 1, MachineState::Healthy),
            machine_at("b1", addr(2, 1), 2, MachineState::Healthy),
            machine_at("b2", addr(2, 2), 2, MachineState::Healthy),
        ];
        let prev = {
            let mut c = base_cluster();
            c.nodes = vec![
                Node::from_machine(&machines[0], &templates()[0], true),
                Node::from_machine(&machines[1], &templates()[1], false),
                Node::from_machine(&machines[2], &templates()[1], false),
            ];
            c
        };
        let (cluster, changes) = changed(
            scheduler::update(&prev, &constraints(2, 1, None), &machines, test_now(), &config())
                .unwrap(),
        );
        assert_eq!(cluster.control_plane_nodes().count(), 2);
        assert_eq!(cluster.worker_nodes().count(), 1);
        assert!(changes.iter().any(|c| c.starts_with("promote a worker:")));
    }

    #[test]
    fn promotion_refused_when_workers_would_drop_below_minimum() {
        let machines = vec![
            machine_at("a1", addr(1, 1), 1, MachineState::Healthy),
            machine_at("b1", addr(2, 1), 2, MachineState::Healthy),
        ];
        let prev = {
            let mut c = base_cluster();
            c.nodes = vec![
                Node::from_machine(&machines[0], &templates()[0], true),
                Node::from_machine(&machines[1], &templates()[1], false),
            ];
            c
        };
        let err = scheduler::update(
            &prev,
            &constraints(2, 1, None),
            &machines,
            test_now(),
            &config(),
        )
        .unwrap_err();
        assert_eq!(err, SchedulerError::NoControlPlaneCandidate);
    }

    #[test]
    fn removal_order_is_reverse_of_addition_order() {
        // Identical machines in one rack: addition took list order, so
        // shrinking must let the last-added member go first.
        let machines = vec![
            machine_at("a1", addr(1, 1), 1, MachineState::Healthy),
            machine_at("a2", addr(1, 2), 1, MachineState::Healthy),
            machine_at("a3", addr(1, 3), 1, MachineState::Healthy),
        ];
        let (grown, _) = scheduler::generate(
            &base_cluster(),
            &constraints(3, 0, None),
            &machines,
            test_now(),
            &config(),
        )
        .unwrap();
        let added: Vec<String> = grown.nodes.iter().map(|n| n.address.clone()).collect();

        let (shrunk, changes) = changed(
            scheduler::update(
                &grown,
                &constraints(1, 0, Some(0)),
                &machines,
                test_now(),
                &config(),
            )
            .unwrap(),
        );
        assert_eq!(shrunk.control_plane_nodes().count(), 1);
        // First removal is the last addition
        assert_eq!(
            changes[0],
            format!("remove a control plane: {}", added[2])
        );
        assert_eq!(
            changes[1],
            format!("remove a control plane: {}", added[1])
        );
    }

    #[test]
    fn worker_roles_stay_balanced_within_one() {
        let mut base = base_cluster();
        base.template = vec![
            templates()[0].clone(),
            worker_role("compute"),
            worker_role("storage"),
            worker_role("ingest"),
        ];
        let mut machines = vec![machine_at("cp", addr(1, 1), 1, MachineState::Healthy)];
        for i in 0..9u8 {
            machines.push(machine_at(
                &format!("w{}", i),
                addr(3, i + 1),
                3,
                MachineState::Healthy,
            ));
        }
        base.nodes = vec![Node::from_machine(&machines[0], &base.template[0], true)];

        let (cluster, _) = changed(
            scheduler::update(&base, &constraints(1, 9, None), &machines, test_now(), &config())
                .unwrap(),
        );
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for w in cluster.worker_nodes() {
            *counts.entry(w.role().unwrap()).or_insert(0) += 1;
        }
        let max = counts.values().max().unwrap();
        let min = counts.values().min().unwrap();
        assert!(max - min <= 1, "unbalanced roles: {:?}", counts);
        assert_eq!(counts.len(), 3);
    }

    #[test]
    fn retiring_worker_leaves_only_after_grace() {
        let mut machines = vec![
            machine_at("cp", addr(1, 1), 1, MachineState::Healthy),
            machine_at("w1", addr(2, 1), 2, MachineState::Retiring),
            machine_at("w2", addr(2, 2), 2, MachineState::Healthy),
        ];
        machines[1].status.duration_secs = 60.0; // within grace
        let prev = {
            let mut c = base_cluster();
            c.nodes = vec![
                Node::from_machine(&machines[0], &templates()[0], true),
                Node::from_machine(&machines[1], &templates()[1], false),
                Node::from_machine(&machines[2], &templates()[1], false),
            ];
            c
        };

        let outcome =
            scheduler::update(&prev, &constraints(1, 1, None), &machines, test_now(), &config())
                .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);

        machines[1].status.duration_secs = 7200.0; // grace passed
        let (cluster, changes) = changed(
            scheduler::update(&prev, &constraints(1, 1, None), &machines, test_now(), &config())
                .unwrap(),
        );
        assert_eq!(cluster.worker_nodes().count(), 1);
        assert_eq!(changes, vec!["remove a worker: 10.0.2.1"]);
    }

    #[test]
    fn retiring_worker_at_minimum_needs_backfill() {
        let mut machines = vec![
            machine_at("cp", addr(1, 1), 1, MachineState::Healthy),
            machine_at("w1", addr(2, 1), 2, MachineState::Retiring),
        ];
        machines[1].status.duration_secs = 7200.0;
        let prev = {
            let mut c = base_cluster();
            c.nodes = vec![
                Node::from_machine(&machines[0], &templates()[0], true),
                Node::from_machine(&machines[1], &templates()[1], false),
            ];
            c
        };

        // No spare machine: the retiring worker must stay
        let outcome =
            scheduler::update(&prev, &constraints(1, 1, None), &machines, test_now(), &config())
                .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);

        // With a spare, the backfill lands before the removal
        machines.push(machine_at("spare", addr(3, 1), 3, MachineState::Healthy));
        let (cluster, changes) = changed(
            scheduler::update(&prev, &constraints(1, 1, None), &machines, test_now(), &config())
                .unwrap(),
        );
        assert_eq!(cluster.worker_nodes().count(), 1);
        assert_eq!(
            changes,
            vec!["add new worker: 10.0.3.1", "remove a worker: 10.0.2.1"]
        );
    }

    #[test]
    fn converged_cluster_is_unchanged() {
        let machines = vec![
            machine_at("a1", addr(1, 1), 1, MachineState::Healthy),
            machine_at("b1", addr(2, 1), 2, MachineState::Healthy),
        ];
        let prev = {
            let mut c = base_cluster();
            c.nodes = vec![
                Node::from_machine(&machines[0], &templates()[0], true),
                Node::from_machine(&machines[1], &templates()[1], false),
            ];
            c
        };
        let outcome =
            scheduler::update(&prev, &constraints(1, 1, None), &machines, test_now(), &config())
                .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
    }

    fn worker_role(role: &str) -> NodeTemplate {
        NodeTemplate {
            role: role.to_string(),
            control_plane: false,
            weight: 1.0,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            taints: vec![],
        }
    }
}
