//! Shared test fixtures
//!
//! Builders for clusters, machines and converged status snapshots, plus
//! mock implementations of the infra traits so engine and decision tests
//! run without any remote infrastructure.

use crate::components::{self, ImageCatalog};
use crate::error::ControllerError;
use crate::infra::{EtcdAdminApi, EtcdHealth, Infra, KubeApi, VersionStore};
use agent_client::MockAgentClient;
use chrono::{DateTime, TimeZone, Utc};
use models::{
    Cluster, ClusterStatus, Component, Constraints, EtcdMember, EtcdStatus, KubernetesStatus,
    Machine, MachineSpec, MachineState, MachineStatus, Node, NodeResource, NodeStatus,
    NodeTemplate, ServiceStatus,
};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use storage::StorageError;

pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

pub fn node(address: &str, control_plane: bool) -> Node {
    Node {
        address: address.to_string(),
        control_plane,
        ..Default::default()
    }
}

pub fn addrs(nodes: &[&Node]) -> Vec<String> {
    nodes.iter().map(|n| n.address.clone()).collect()
}

pub fn templates() -> Vec<NodeTemplate> {
    vec![
        NodeTemplate {
            role: "cs".to_string(),
            control_plane: true,
            weight: 1.0,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            taints: vec![],
        },
        NodeTemplate {
            role: "worker".to_string(),
            control_plane: false,
            weight: 1.0,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            taints: vec![],
        },
    ]
}

pub fn cluster_with_nodes(nodes: Vec<Node>) -> Cluster {
    Cluster {
        name: "test".to_string(),
        template: templates(),
        nodes,
        options: Default::default(),
    }
}

pub fn machine_at(serial: &str, addr: Ipv4Addr, rack: u32, state: MachineState) -> Machine {
    Machine {
        spec: MachineSpec {
            serial: serial.to_string(),
            ipv4: vec![addr],
            ipv6: vec![],
            rack,
            index_in_rack: 0,
            role: "cs".to_string(),
            labels: BTreeMap::new(),
            register_date: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            retire_date: test_now() + chrono::Duration::days(2000),
        },
        status: MachineStatus {
            state,
            duration_secs: 0.0,
            timestamp: test_now(),
        },
    }
}

pub fn machine_in_rack(
    serial: &str,
    rack: u32,
    state: MachineState,
    retire_date: DateTime<Utc>,
) -> Machine {
    let octet = serial.bytes().next().unwrap_or(1);
    let mut m = machine_at(serial, Ipv4Addr::new(10, 0, rack as u8, octet), rack, state);
    m.spec.retire_date = retire_date;
    m
}

fn converged_service(
    component: Component,
    cluster: &Cluster,
    node: &Node,
    images: &ImageCatalog,
) -> ServiceStatus {
    ServiceStatus {
        running: true,
        healthy: true,
        image: images.image(component).to_string(),
        built_in_params: components::desired_params(component, cluster, node),
        extra_params: cluster.component_params(component.name()),
    }
}

/// A status snapshot in which the cluster is fully converged: everything
/// reachable, running, current, in sync and mirrored into Kubernetes.
pub fn converged_status(cluster: &Cluster, images: &ImageCatalog) -> ClusterStatus {
    let mut nodes = HashMap::new();
    let mut members = HashMap::new();
    let mut in_sync = HashMap::new();
    for (i, n) in cluster.nodes.iter().enumerate() {
        let mut services = BTreeMap::new();
        for component in Component::all() {
            if component.control_plane_only() && !n.control_plane {
                continue;
            }
            services.insert(component, converged_service(component, cluster, n, images));
        }
        nodes.insert(
            n.address.clone(),
            NodeStatus {
                reachable: true,
                etcd_has_data: n.control_plane,
                services,
            },
        );
        if n.control_plane {
            members.insert(
                n.address.clone(),
                EtcdMember {
                    id: i as u64 + 1,
                    name: n.address.clone(),
                    peer_urls: vec![format!("https://{}:2380", n.address)],
                },
            );
            in_sync.insert(n.address.clone(), true);
        }
    }

    let mut cp_addrs: Vec<String> = cluster
        .control_plane_nodes()
        .map(|n| n.address.clone())
        .collect();
    cp_addrs.sort();

    let mut resource_versions = BTreeMap::new();
    for manifest in crate::ops::resource::static_resources() {
        let (kind, ns, name) = crate::ops::resource::manifest_key(&manifest);
        resource_versions.insert(
            format!("{}/{}/{}", kind, ns, name),
            crate::ops::resource::RESOURCE_REVISION.to_string(),
        );
    }

    ClusterStatus {
        nodes,
        etcd: EtcdStatus {
            initialized: true,
            is_healthy: true,
            members,
            in_sync,
        },
        kubernetes: KubernetesStatus {
            is_ready: true,
            nodes: cluster
                .nodes
                .iter()
                .map(|n| NodeResource {
                    name: n.address.clone(),
                    labels: n.labels.clone(),
                    annotations: n.annotations.clone(),
                    taints: n.taints.clone(),
                })
                .collect(),
            dns_servers: Some(cluster.options.dns_servers.clone()),
            apiserver_endpoints: Some(cp_addrs.clone()),
            etcd_endpoints: Some(cp_addrs),
            resource_versions,
            backup: Default::default(),
        },
    }
}

/// Mock etcd administration: in-memory member table plus a call log.
#[derive(Clone, Default)]
pub struct MockEtcdAdmin {
    state: Arc<Mutex<MockEtcdState>>,
}

#[derive(Default)]
struct MockEtcdState {
    members: HashMap<String, EtcdMember>,
    healthy: bool,
    calls: Vec<String>,
    fail_next: Option<String>,
}

impl MockEtcdAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_members(&self, members: HashMap<String, EtcdMember>) {
        self.state.lock().unwrap().members = members;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().unwrap().healthy = healthy;
    }

    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn enter(&self, call: String) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(msg) = state.fail_next.take() {
            return Err(ControllerError::Command(msg));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EtcdAdminApi for MockEtcdAdmin {
    async fn member_list(
        &self,
        _endpoints: &[String],
    ) -> Result<HashMap<String, EtcdMember>, ControllerError> {
        self.enter("member_list".to_string())?;
        Ok(self.state.lock().unwrap().members.clone())
    }

    async fn add_member(&self, _endpoints: &[String], peer_url: &str) -> Result<(), ControllerError> {
        self.enter(format!("add_member {}", peer_url))?;
        let addr = peer_url
            .split_once("://")
            .map(|(_, r)| r)
            .and_then(|r| r.split(':').next())
            .unwrap_or(peer_url)
            .to_string();
        let id = self.state.lock().unwrap().members.len() as u64 + 100;
        self.state.lock().unwrap().members.insert(
            addr,
            EtcdMember {
                id,
                name: String::new(),
                peer_urls: vec![peer_url.to_string()],
            },
        );
        Ok(())
    }

    async fn remove_member(&self, _endpoints: &[String], id: u64) -> Result<(), ControllerError> {
        self.enter(format!("remove_member {}", id))?;
        let mut state = self.state.lock().unwrap();
        state.members.retain(|_, m| m.id != id);
        Ok(())
    }

    async fn cluster_health(&self, endpoints: &[String]) -> Result<EtcdHealth, ControllerError> {
        self.enter("cluster_health".to_string())?;
        let state = self.state.lock().unwrap();
        let in_sync = endpoints
            .iter()
            .map(|e| (e.clone(), state.healthy))
            .collect();
        Ok(EtcdHealth {
            healthy: state.healthy,
            in_sync,
        })
    }
}

/// Mock Kubernetes API: records every mutation.
#[derive(Clone, Default)]
pub struct MockKubeApi {
    state: Arc<Mutex<MockKubeState>>,
}

#[derive(Default)]
struct MockKubeState {
    ready: bool,
    nodes: Vec<NodeResource>,
    calls: Vec<String>,
    fail_next: Option<String>,
}

impl MockKubeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().ready = ready;
    }

    pub fn set_nodes(&self, nodes: Vec<NodeResource>) {
        self.state.lock().unwrap().nodes = nodes;
    }

    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn enter(&self, call: String) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(msg) = state.fail_next.take() {
            return Err(ControllerError::Command(msg));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KubeApi for MockKubeApi {
    async fn is_ready(&self) -> bool {
        self.state.lock().unwrap().ready
    }

    async fn list_nodes(&self) -> Result<Vec<NodeResource>, ControllerError> {
        self.enter("list_nodes".to_string())?;
        Ok(self.state.lock().unwrap().nodes.clone())
    }

    async fn update_node(&self, node: &NodeResource) -> Result<(), ControllerError> {
        self.enter(format!("update_node {}", node.name))
    }

    async fn delete_node(&self, name: &str) -> Result<(), ControllerError> {
        self.enter(format!("delete_node {}", name))
    }

    async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ControllerError> {
        self.enter(format!("get_configmap {}/{}", namespace, name))?;
        Ok(None)
    }

    async fn apply_configmap(
        &self,
        namespace: &str,
        name: &str,
        _data: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        self.enter(format!("apply_configmap {}/{}", namespace, name))
    }

    async fn get_endpoints(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Vec<String>>, ControllerError> {
        self.enter(format!("get_endpoints {}/{}", namespace, name))?;
        Ok(None)
    }

    async fn apply_endpoints(
        &self,
        namespace: &str,
        name: &str,
        addresses: &[String],
        _port: u16,
    ) -> Result<(), ControllerError> {
        self.enter(format!(
            "apply_endpoints {}/{} [{}]",
            namespace,
            name,
            addresses.join(",")
        ))
    }

    async fn apply_manifest(&self, manifest: &serde_json::Value) -> Result<(), ControllerError> {
        let (kind, ns, name) = crate::ops::resource::manifest_key(manifest);
        self.enter(format!("apply_manifest {}/{}/{}", kind, ns, name))
    }

    async fn delete_resource(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError> {
        self.enter(format!("delete_resource {}/{}/{}", kind, namespace, name))
    }

    async fn resource_exists(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ControllerError> {
        self.enter(format!("resource_exists {}/{}/{}", kind, namespace, name))?;
        Ok(false)
    }

    async fn get_manifest_revision(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ControllerError> {
        self.enter(format!("get_revision {}/{}/{}", kind, namespace, name))?;
        Ok(None)
    }

    async fn get_cronjob_schedule(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ControllerError> {
        self.enter(format!("get_cronjob {}/{}", namespace, name))?;
        Ok(None)
    }
}

/// Mock schema-version store.
#[derive(Clone, Default)]
pub struct MockVersionStore {
    migrations: Arc<Mutex<u32>>,
    fail: Arc<Mutex<bool>>,
}

impl MockVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn migrations(&self) -> u32 {
        *self.migrations.lock().unwrap()
    }

    pub fn fail(&self) {
        *self.fail.lock().unwrap() = true;
    }
}

#[async_trait::async_trait]
impl VersionStore for MockVersionStore {
    async fn migrate(&self) -> Result<(), StorageError> {
        if *self.fail.lock().unwrap() {
            return Err(StorageError::Conflict("version".to_string()));
        }
        *self.migrations.lock().unwrap() += 1;
        Ok(())
    }
}

/// An infra handle wired to fresh mocks, returned alongside them so
/// tests can seed state and assert on calls.
pub struct MockInfra {
    pub agent: MockAgentClient,
    pub etcd: MockEtcdAdmin,
    pub kube: MockKubeApi,
    pub version: MockVersionStore,
    pub infra: Infra,
}

pub fn mock_infra() -> MockInfra {
    let agent = MockAgentClient::new();
    let etcd = MockEtcdAdmin::new();
    let kube = MockKubeApi::new();
    let version = MockVersionStore::new();
    let infra = Infra {
        agent: Arc::new(agent.clone()),
        etcd: Arc::new(etcd.clone()),
        kube: Arc::new(kube.clone()),
        version: Arc::new(version.clone()),
        images: ImageCatalog::default(),
    };
    MockInfra {
        agent,
        etcd,
        kube,
        version,
        infra,
    }
}

/// Default constraints matching a 3 control-plane / 2 worker layout.
pub fn constraints(cp: usize, min_workers: usize, max_workers: Option<usize>) -> Constraints {
    Constraints {
        control_plane_count: cp,
        minimum_workers: min_workers,
        maximum_workers: max_workers,
    }
}
