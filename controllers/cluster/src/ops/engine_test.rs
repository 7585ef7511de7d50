//! Execution engine tests
//!
//! Exercise the record lifecycle against mock infrastructure: completion,
//! mid-operator failure, cancellation between commanders, and the
//! recover-by-recomputation path after a failure is fixed.

use crate::ops::etcd::EtcdDestroyMemberOperator;
use crate::ops::{OperatorOutcome, run_operator};
use crate::test_utils::*;
use agent_client::AgentApi;
use agent_client::ContainerSpec;
use models::{Component, RecordStatus};
use storage::MemoryRecordSink;
use tokio::sync::watch;

fn destroy_op(cluster: &models::Cluster) -> Box<dyn crate::ops::Operator> {
    let worker = cluster.node("10.0.1.1").unwrap();
    Box::new(EtcdDestroyMemberOperator::new(worker, 42, cluster))
}

fn seeded_cluster_and_infra() -> (models::Cluster, MockInfra) {
    let cluster = cluster_with_nodes(vec![node("10.0.0.1", true), node("10.0.1.1", false)]);
    let mocks = mock_infra();
    mocks.agent.seed_container(
        "10.0.1.1",
        ContainerSpec {
            name: Component::Etcd.name().to_string(),
            image: "etcd:old".to_string(),
            ..Default::default()
        },
        true,
    );
    mocks.agent.seed_path("10.0.1.1", &cluster.options.etcd.data_dir);
    (cluster, mocks)
}

#[tokio::test]
async fn completed_operator_records_every_command() {
    let (cluster, mocks) = seeded_cluster_and_infra();
    let sink = MemoryRecordSink::new();
    let (_tx, cancel) = watch::channel(false);

    let outcome = run_operator(destroy_op(&cluster), &mocks.infra, &sink, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, OperatorOutcome::Completed);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.operation, "etcd-destroy-member");
    assert_eq!(record.targets, vec!["10.0.1.1"]);
    assert_eq!(record.trace.len(), 3);
    assert!(record.finished_at.is_some());
    assert!(record.error.is_none());

    // Remote state reflects all three commands
    assert!(mocks.agent.container("10.0.1.1", "etcd").is_none());
    assert!(mocks.etcd.calls().iter().any(|c| c == "remove_member 42"));
}

#[tokio::test]
async fn failure_stops_the_operator_and_is_recorded() {
    let (cluster, mocks) = seeded_cluster_and_infra();
    let sink = MemoryRecordSink::new();
    let (_tx, cancel) = watch::channel(false);
    mocks.etcd.fail_next("etcd unavailable");

    let outcome = run_operator(destroy_op(&cluster), &mocks.infra, &sink, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, OperatorOutcome::CommandFailed);

    let record = &sink.records()[0];
    assert_eq!(record.status, RecordStatus::Failed);
    // The first commander (container removal) completed, the second
    // (member removal) failed; nothing past it ran.
    assert_eq!(record.trace.len(), 2);
    assert!(record.command.starts_with("etcd-remove-member"));
    assert!(record.error.as_deref().unwrap().contains("etcd unavailable"));
    assert!(mocks.agent.container("10.0.1.1", "etcd").is_none());
    assert!(!mocks
        .agent
        .calls()
        .iter()
        .any(|c| c.starts_with("remove_path")));
}

#[tokio::test]
async fn rerun_after_fix_completes_idempotently() {
    let (cluster, mocks) = seeded_cluster_and_infra();
    let sink = MemoryRecordSink::new();
    let (_tx, cancel) = watch::channel(false);

    mocks.etcd.fail_next("etcd unavailable");
    let outcome = run_operator(destroy_op(&cluster), &mocks.infra, &sink, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, OperatorOutcome::CommandFailed);

    // The fault clears; the next tick decides a fresh operator and the
    // already-applied container removal is a no-op.
    let outcome = run_operator(destroy_op(&cluster), &mocks.infra, &sink, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, OperatorOutcome::Completed);

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].status, RecordStatus::Completed);
    assert!(mocks.etcd.calls().iter().filter(|c| *c == "remove_member 42").count() >= 1);
    assert!(!mocks
        .agent
        .path_exists("10.0.1.1", &cluster.options.etcd.data_dir)
        .await
        .unwrap());
}

#[tokio::test]
async fn cancellation_between_commanders_marks_the_record() {
    let (cluster, mocks) = seeded_cluster_and_infra();
    let sink = MemoryRecordSink::new();
    let (tx, cancel) = watch::channel(false);
    tx.send(true).unwrap();

    let outcome = run_operator(destroy_op(&cluster), &mocks.infra, &sink, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, OperatorOutcome::Cancelled);

    let record = &sink.records()[0];
    assert_eq!(record.status, RecordStatus::Cancelled);
    assert!(record.trace.is_empty());
    // No remote work happened
    assert!(mocks.agent.calls().is_empty());
    assert!(mocks.etcd.calls().is_empty());
}
