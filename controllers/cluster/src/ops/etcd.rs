//! etcd operators
//!
//! Everything that touches the managed etcd cluster's membership or its
//! member containers. Membership changes are deliberately conservative:
//! add and restart operators handle one member per tick, and destroy is
//! distinct from stop (a member on a demoted node must lose its data and
//! its membership, never linger stopped).

use crate::components::{self, EtcdMode, ImageCatalog};
use crate::error::ControllerError;
use crate::infra::Infra;
use crate::ops::common::{PullImage, RemoveContainers, RemovePath, RunContainers};
use crate::ops::{CommandDesc, Commander, Operator};
use agent_client::ContainerSpec;
use models::{Cluster, Component, Node};
use std::time::Duration;

/// Add a member to the cluster by peer URL.
pub struct AddMember {
    pub endpoints: Vec<String>,
    pub peer_url: String,
}

#[async_trait::async_trait]
impl Commander for AddMember {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "etcd-add-member".to_string(),
            targets: vec![self.peer_url.clone()],
            detail: String::new(),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        infra.etcd.add_member(&self.endpoints, &self.peer_url).await
    }
}

/// Remove a member from the cluster by id.
pub struct RemoveMember {
    pub endpoints: Vec<String>,
    pub id: u64,
    pub address: String,
}

#[async_trait::async_trait]
impl Commander for RemoveMember {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "etcd-remove-member".to_string(),
            targets: vec![self.address.clone()],
            detail: format!("member {}", self.id),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        infra.etcd.remove_member(&self.endpoints, self.id).await
    }
}

/// Poll the cluster until it reports healthy, bounded retries with a
/// fixed sleep between attempts.
pub struct WaitEtcdCluster {
    pub endpoints: Vec<String>,
    pub retries: u32,
    pub interval: Duration,
}

impl WaitEtcdCluster {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            retries: 30,
            interval: Duration::from_secs(2),
        }
    }
}

#[async_trait::async_trait]
impl Commander for WaitEtcdCluster {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "wait-etcd-cluster".to_string(),
            targets: self.endpoints.clone(),
            detail: String::new(),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        for _ in 0..self.retries {
            match infra.etcd.cluster_health(&self.endpoints).await {
                Ok(health) if health.healthy => return Ok(()),
                Ok(_) => {}
                Err(_) => {}
            }
            tokio::time::sleep(self.interval).await;
        }
        Err(ControllerError::Command(format!(
            "etcd cluster not healthy within {} attempts",
            self.retries
        )))
    }
}

fn cp_addresses(cluster: &Cluster) -> Vec<String> {
    cluster
        .control_plane_nodes()
        .map(|n| n.address.clone())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootStep {
    Pull,
    Run,
    Wait,
    Done,
}

/// One-shot first boot of the whole etcd cluster. Only decided when no
/// member has data on disk and every control-plane node is reachable.
pub struct EtcdBootOperator {
    targets: Vec<String>,
    image: String,
    specs: Vec<(String, ContainerSpec)>,
    step: BootStep,
}

impl EtcdBootOperator {
    pub fn new(cluster: &Cluster, images: &ImageCatalog) -> Self {
        let specs: Vec<(String, ContainerSpec)> = cluster
            .control_plane_nodes()
            .map(|n| {
                (
                    n.address.clone(),
                    components::etcd_container_spec(cluster, n, images, EtcdMode::New),
                )
            })
            .collect();
        Self {
            targets: cp_addresses(cluster),
            image: images.etcd.clone(),
            specs,
            step: BootStep::Pull,
        }
    }
}

impl Operator for EtcdBootOperator {
    fn name(&self) -> &'static str {
        "etcd-bootstrap"
    }

    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        match self.step {
            BootStep::Pull => {
                self.step = BootStep::Run;
                Some(Box::new(PullImage {
                    image: self.image.clone(),
                    targets: self.targets.clone(),
                }))
            }
            BootStep::Run => {
                self.step = BootStep::Wait;
                Some(Box::new(RunContainers {
                    container: Component::Etcd.name().to_string(),
                    specs: self.specs.clone(),
                }))
            }
            BootStep::Wait => {
                self.step = BootStep::Done;
                Some(Box::new(WaitEtcdCluster::new(self.targets.clone())))
            }
            BootStep::Done => None,
        }
    }
}

/// Restart etcd containers for existing members that should be running
/// but are not. The data directory is authoritative, so no initial
/// flags are passed.
pub struct EtcdStartOperator {
    targets: Vec<String>,
    image: String,
    specs: Vec<(String, ContainerSpec)>,
    endpoints: Vec<String>,
    step: BootStep,
}

impl EtcdStartOperator {
    pub fn new(nodes: &[&Node], cluster: &Cluster, images: &ImageCatalog) -> Self {
        let specs = nodes
            .iter()
            .map(|n| {
                (
                    n.address.clone(),
                    components::etcd_container_spec(cluster, n, images, EtcdMode::Restart),
                )
            })
            .collect();
        Self {
            targets: nodes.iter().map(|n| n.address.clone()).collect(),
            image: images.etcd.clone(),
            specs,
            endpoints: cp_addresses(cluster),
            step: BootStep::Pull,
        }
    }
}

impl Operator for EtcdStartOperator {
    fn name(&self) -> &'static str {
        "etcd-start"
    }

    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        match self.step {
            BootStep::Pull => {
                self.step = BootStep::Run;
                Some(Box::new(PullImage {
                    image: self.image.clone(),
                    targets: self.targets.clone(),
                }))
            }
            BootStep::Run => {
                self.step = BootStep::Wait;
                Some(Box::new(RunContainers {
                    container: Component::Etcd.name().to_string(),
                    specs: self.specs.clone(),
                }))
            }
            BootStep::Wait => {
                self.step = BootStep::Done;
                Some(Box::new(WaitEtcdCluster::new(self.endpoints.clone())))
            }
            BootStep::Done => None,
        }
    }
}

/// Block the remaining phases until the cluster reports healthy.
pub struct EtcdWaitOperator {
    endpoints: Vec<String>,
    done: bool,
}

impl EtcdWaitOperator {
    pub fn new(cluster: &Cluster) -> Self {
        Self {
            endpoints: cp_addresses(cluster),
            done: false,
        }
    }
}

impl Operator for EtcdWaitOperator {
    fn name(&self) -> &'static str {
        "etcd-wait-cluster"
    }

    fn targets(&self) -> Vec<String> {
        self.endpoints.clone()
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(Box::new(WaitEtcdCluster::new(self.endpoints.clone())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddStep {
    Pull,
    Add,
    Run,
    Wait,
    Done,
}

/// Add one newly-desired member: register it, then start its container
/// in join mode. One member per tick keeps quorum arithmetic simple.
pub struct EtcdAddMemberOperator {
    target: String,
    endpoints: Vec<String>,
    image: String,
    spec: ContainerSpec,
    step: AddStep,
}

impl EtcdAddMemberOperator {
    pub fn new(node: &Node, cluster: &Cluster, images: &ImageCatalog) -> Self {
        Self {
            target: node.address.clone(),
            endpoints: cp_addresses(cluster),
            image: images.etcd.clone(),
            spec: components::etcd_container_spec(cluster, node, images, EtcdMode::Join),
            step: AddStep::Pull,
        }
    }
}

impl Operator for EtcdAddMemberOperator {
    fn name(&self) -> &'static str {
        "etcd-add-member"
    }

    fn targets(&self) -> Vec<String> {
        vec![self.target.clone()]
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        match self.step {
            AddStep::Pull => {
                self.step = AddStep::Add;
                Some(Box::new(PullImage {
                    image: self.image.clone(),
                    targets: vec![self.target.clone()],
                }))
            }
            AddStep::Add => {
                self.step = AddStep::Run;
                Some(Box::new(AddMember {
                    endpoints: self.endpoints.clone(),
                    peer_url: format!("https://{}:2380", self.target),
                }))
            }
            AddStep::Run => {
                self.step = AddStep::Wait;
                Some(Box::new(RunContainers {
                    container: Component::Etcd.name().to_string(),
                    specs: vec![(self.target.clone(), self.spec.clone())],
                }))
            }
            AddStep::Wait => {
                self.step = AddStep::Done;
                Some(Box::new(WaitEtcdCluster::new(self.endpoints.clone())))
            }
            AddStep::Done => None,
        }
    }
}

/// Remove members that should no longer exist (orphans or stale cluster
/// members), one commander per member.
pub struct EtcdRemoveMemberOperator {
    endpoints: Vec<String>,
    members: std::vec::IntoIter<(String, u64)>,
    targets: Vec<String>,
}

impl EtcdRemoveMemberOperator {
    pub fn new(cluster: &Cluster, members: Vec<(String, u64)>) -> Self {
        let targets = members.iter().map(|(a, _)| a.clone()).collect();
        Self {
            endpoints: cp_addresses(cluster),
            members: members.into_iter(),
            targets,
        }
    }
}

impl Operator for EtcdRemoveMemberOperator {
    fn name(&self) -> &'static str {
        "etcd-remove-member"
    }

    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        let (address, id) = self.members.next()?;
        Some(Box::new(RemoveMember {
            endpoints: self.endpoints.clone(),
            id,
            address,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestroyStep {
    RemoveContainer,
    RemoveMember,
    RemoveData,
    Done,
}

/// Destroy a member running on a node that is no longer control plane:
/// container, membership and data directory all go.
pub struct EtcdDestroyMemberOperator {
    target: String,
    member_id: u64,
    endpoints: Vec<String>,
    data_dir: String,
    step: DestroyStep,
}

impl EtcdDestroyMemberOperator {
    pub fn new(node: &Node, member_id: u64, cluster: &Cluster) -> Self {
        Self {
            target: node.address.clone(),
            member_id,
            endpoints: cp_addresses(cluster),
            data_dir: cluster.options.etcd.data_dir.clone(),
            step: DestroyStep::RemoveContainer,
        }
    }
}

impl Operator for EtcdDestroyMemberOperator {
    fn name(&self) -> &'static str {
        "etcd-destroy-member"
    }

    fn targets(&self) -> Vec<String> {
        vec![self.target.clone()]
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        match self.step {
            DestroyStep::RemoveContainer => {
                self.step = DestroyStep::RemoveMember;
                Some(Box::new(RemoveContainers {
                    container: Component::Etcd.name().to_string(),
                    targets: vec![self.target.clone()],
                }))
            }
            DestroyStep::RemoveMember => {
                self.step = DestroyStep::RemoveData;
                Some(Box::new(RemoveMember {
                    endpoints: self.endpoints.clone(),
                    id: self.member_id,
                    address: self.target.clone(),
                }))
            }
            DestroyStep::RemoveData => {
                self.step = DestroyStep::Done;
                Some(Box::new(RemovePath {
                    path: self.data_dir.clone(),
                    targets: vec![self.target.clone()],
                }))
            }
            DestroyStep::Done => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReAddStep {
    RemoveOld,
    Pull,
    Add,
    Run,
    Wait,
    Done,
}

/// Re-add a member that was registered but whose process never joined
/// (its member name is still empty): drop the half-added registration
/// and go through a clean add.
pub struct EtcdReAddMemberOperator {
    target: String,
    member_id: u64,
    endpoints: Vec<String>,
    image: String,
    spec: ContainerSpec,
    step: ReAddStep,
}

impl EtcdReAddMemberOperator {
    pub fn new(node: &Node, member_id: u64, cluster: &Cluster, images: &ImageCatalog) -> Self {
        Self {
            target: node.address.clone(),
            member_id,
            endpoints: cp_addresses(cluster),
            image: images.etcd.clone(),
            spec: components::etcd_container_spec(cluster, node, images, EtcdMode::Join),
            step: ReAddStep::RemoveOld,
        }
    }
}

impl Operator for EtcdReAddMemberOperator {
    fn name(&self) -> &'static str {
        "etcd-readd-member"
    }

    fn targets(&self) -> Vec<String> {
        vec![self.target.clone()]
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        match self.step {
            ReAddStep::RemoveOld => {
                self.step = ReAddStep::Pull;
                Some(Box::new(RemoveMember {
                    endpoints: self.endpoints.clone(),
                    id: self.member_id,
                    address: self.target.clone(),
                }))
            }
            ReAddStep::Pull => {
                self.step = ReAddStep::Add;
                Some(Box::new(PullImage {
                    image: self.image.clone(),
                    targets: vec![self.target.clone()],
                }))
            }
            ReAddStep::Add => {
                self.step = ReAddStep::Run;
                Some(Box::new(AddMember {
                    endpoints: self.endpoints.clone(),
                    peer_url: format!("https://{}:2380", self.target),
                }))
            }
            ReAddStep::Run => {
                self.step = ReAddStep::Wait;
                Some(Box::new(RunContainers {
                    container: Component::Etcd.name().to_string(),
                    specs: vec![(self.target.clone(), self.spec.clone())],
                }))
            }
            ReAddStep::Wait => {
                self.step = ReAddStep::Done;
                Some(Box::new(WaitEtcdCluster::new(self.endpoints.clone())))
            }
            ReAddStep::Done => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartStep {
    Stop,
    Run,
    Wait,
    Done,
}

/// Restart one outdated member with the desired parameters. One member
/// per tick; the sync gate in the decision procedure keeps a rolling
/// restart from ever taking two members down together.
pub struct EtcdRestartOperator {
    target: String,
    endpoints: Vec<String>,
    spec: ContainerSpec,
    step: RestartStep,
}

impl EtcdRestartOperator {
    pub fn new(node: &Node, cluster: &Cluster, images: &ImageCatalog) -> Self {
        Self {
            target: node.address.clone(),
            endpoints: cp_addresses(cluster),
            spec: components::etcd_container_spec(cluster, node, images, EtcdMode::Restart),
            step: RestartStep::Stop,
        }
    }
}

impl Operator for EtcdRestartOperator {
    fn name(&self) -> &'static str {
        "etcd-restart"
    }

    fn targets(&self) -> Vec<String> {
        vec![self.target.clone()]
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        match self.step {
            RestartStep::Stop => {
                self.step = RestartStep::Run;
                Some(Box::new(RemoveContainers {
                    container: Component::Etcd.name().to_string(),
                    targets: vec![self.target.clone()],
                }))
            }
            RestartStep::Run => {
                self.step = RestartStep::Wait;
                Some(Box::new(RunContainers {
                    container: Component::Etcd.name().to_string(),
                    specs: vec![(self.target.clone(), self.spec.clone())],
                }))
            }
            RestartStep::Wait => {
                self.step = RestartStep::Done;
                Some(Box::new(WaitEtcdCluster::new(self.endpoints.clone())))
            }
            RestartStep::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{cluster_with_nodes, node};

    #[test]
    fn destroy_removes_membership_and_data() {
        let cluster = cluster_with_nodes(vec![node("10.0.0.1", true), node("10.0.1.1", false)]);
        let worker = cluster.node("10.0.1.1").unwrap();
        let mut op = EtcdDestroyMemberOperator::new(worker, 42, &cluster);
        let names: Vec<String> = std::iter::from_fn(|| op.next_command())
            .map(|c| c.command().name)
            .collect();
        assert_eq!(
            names,
            vec!["remove-container", "etcd-remove-member", "remove-path"]
        );
    }

    #[test]
    fn add_member_registers_before_starting() {
        let cluster = cluster_with_nodes(vec![node("10.0.0.1", true), node("10.0.0.2", true)]);
        let new_node = cluster.node("10.0.0.2").unwrap();
        let mut op = EtcdAddMemberOperator::new(new_node, &cluster, &ImageCatalog::default());
        let names: Vec<String> = std::iter::from_fn(|| op.next_command())
            .map(|c| c.command().name)
            .collect();
        assert_eq!(
            names,
            vec!["pull-image", "etcd-add-member", "run-container", "wait-etcd-cluster"]
        );
    }

    #[test]
    fn join_spec_declares_existing_cluster_state() {
        let cluster = cluster_with_nodes(vec![node("10.0.0.1", true)]);
        let n = cluster.node("10.0.0.1").unwrap();
        let spec = components::etcd_container_spec(
            &cluster,
            n,
            &ImageCatalog::default(),
            EtcdMode::Join,
        );
        assert!(spec
            .args
            .iter()
            .any(|a| a == "--initial-cluster-state=existing"));
        let restart = components::etcd_container_spec(
            &cluster,
            n,
            &ImageCatalog::default(),
            EtcdMode::Restart,
        );
        assert!(!restart.args.iter().any(|a| a.starts_with("--initial-cluster")));
    }
}
