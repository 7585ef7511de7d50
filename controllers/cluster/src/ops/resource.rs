//! Kubernetes resource maintenance
//!
//! Operators reconciling the cluster-level objects the engine owns:
//! version-annotated static resources, the cluster DNS ConfigMap, the
//! API-server and etcd Endpoints objects, Node label/annotation/taint
//! drift, and stale Node object removal.

use crate::error::ControllerError;
use crate::infra::{Infra, REVISION_ANNOTATION};
use crate::ops::{CommandDesc, Commander, Operator};
use models::NodeResource;
use std::collections::BTreeMap;

/// Namespace holding the engine-owned system objects.
pub const NAMESPACE_SYSTEM: &str = "kube-system";
/// Name of the cluster DNS upstream ConfigMap.
pub const DNS_CONFIGMAP: &str = "metalops-dns";
/// Name of the Endpoints object mirroring the etcd members.
pub const ETCD_ENDPOINTS: &str = "metalops-etcd";
/// Name shared by the etcd-backup ConfigMap/Secret/Service/CronJob set.
pub const BACKUP_NAME: &str = "metalops-etcdbackup";

/// Bumped whenever the embedded static resources change; applied objects
/// carry it in their revision annotation.
pub const RESOURCE_REVISION: &str = "3";

const STATIC_RESOURCES_YAML: &str = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: metalops-node
  namespace: kube-system
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: metalops:node-bootstrapper
rules:
- apiGroups: [""]
  resources: ["nodes"]
  verbs: ["get", "list", "watch", "create", "update", "patch"]
- apiGroups: [""]
  resources: ["pods", "endpoints"]
  verbs: ["get", "list", "watch"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: metalops:node-bootstrapper
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: metalops:node-bootstrapper
subjects:
- kind: ServiceAccount
  name: metalops-node
  namespace: kube-system
"#;

/// The static resources the engine applies, revision annotation stamped.
pub fn static_resources() -> Vec<serde_json::Value> {
    STATIC_RESOURCES_YAML
        .split("\n---\n")
        .filter(|doc| !doc.trim().is_empty())
        .map(|doc| {
            let mut value: serde_json::Value =
                serde_yaml::from_str(doc).unwrap_or(serde_json::Value::Null);
            if let Some(metadata) = value.get_mut("metadata") {
                let annotations = metadata
                    .as_object_mut()
                    .map(|m| {
                        m.entry("annotations")
                            .or_insert_with(|| serde_json::json!({}))
                    })
                    .and_then(|a| a.as_object_mut());
                if let Some(annotations) = annotations {
                    annotations.insert(
                        REVISION_ANNOTATION.to_string(),
                        serde_json::Value::String(RESOURCE_REVISION.to_string()),
                    );
                }
            }
            value
        })
        .collect()
}

/// (kind, namespace, name) of a manifest; cluster-scoped kinds use
/// "default" as a placeholder namespace key.
pub fn manifest_key(manifest: &serde_json::Value) -> (String, String, String) {
    (
        manifest["kind"].as_str().unwrap_or_default().to_string(),
        manifest["metadata"]["namespace"]
            .as_str()
            .unwrap_or("default")
            .to_string(),
        manifest["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
    )
}

/// Server-side apply of one manifest.
pub struct ApplyManifest {
    pub manifest: serde_json::Value,
}

#[async_trait::async_trait]
impl Commander for ApplyManifest {
    fn command(&self) -> CommandDesc {
        let (kind, namespace, name) = manifest_key(&self.manifest);
        CommandDesc {
            name: "apply-resource".to_string(),
            targets: vec![],
            detail: format!("{}/{}/{}", kind, namespace, name),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        infra.kube.apply_manifest(&self.manifest).await
    }
}

/// Delete one managed resource.
pub struct DeleteResource {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[async_trait::async_trait]
impl Commander for DeleteResource {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "delete-resource".to_string(),
            targets: vec![],
            detail: format!("{}/{}/{}", self.kind, self.namespace, self.name),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        infra
            .kube
            .delete_resource(&self.kind, &self.namespace, &self.name)
            .await
    }
}

struct ApplyConfigMap {
    namespace: String,
    name: String,
    data: BTreeMap<String, String>,
}

#[async_trait::async_trait]
impl Commander for ApplyConfigMap {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "apply-configmap".to_string(),
            targets: vec![],
            detail: format!("{}/{}", self.namespace, self.name),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        infra
            .kube
            .apply_configmap(&self.namespace, &self.name, &self.data)
            .await
    }
}

struct ApplyEndpoints {
    namespace: String,
    name: String,
    addresses: Vec<String>,
    port: u16,
}

#[async_trait::async_trait]
impl Commander for ApplyEndpoints {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "apply-endpoints".to_string(),
            targets: self.addresses.clone(),
            detail: format!("{}/{}", self.namespace, self.name),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        infra
            .kube
            .apply_endpoints(&self.namespace, &self.name, &self.addresses, self.port)
            .await
    }
}

struct UpdateNodeObject {
    node: NodeResource,
}

#[async_trait::async_trait]
impl Commander for UpdateNodeObject {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "update-node".to_string(),
            targets: vec![self.node.name.clone()],
            detail: String::new(),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        infra.kube.update_node(&self.node).await
    }
}

struct DeleteNodeObject {
    name: String,
}

#[async_trait::async_trait]
impl Commander for DeleteNodeObject {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "delete-node".to_string(),
            targets: vec![self.name.clone()],
            detail: String::new(),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        infra.kube.delete_node(&self.name).await
    }
}

/// Apply static resources that are missing or carry an old revision.
pub struct ResourceApplyOperator {
    manifests: std::vec::IntoIter<serde_json::Value>,
}

impl ResourceApplyOperator {
    pub fn new(manifests: Vec<serde_json::Value>) -> Self {
        Self {
            manifests: manifests.into_iter(),
        }
    }
}

impl Operator for ResourceApplyOperator {
    fn name(&self) -> &'static str {
        "resource-apply"
    }

    fn targets(&self) -> Vec<String> {
        vec![]
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        let manifest = self.manifests.next()?;
        Some(Box::new(ApplyManifest { manifest }))
    }
}

/// Rewrite the cluster DNS upstream ConfigMap.
pub struct DnsConfigOperator {
    servers: Vec<String>,
    done: bool,
}

impl DnsConfigOperator {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            done: false,
        }
    }
}

impl Operator for DnsConfigOperator {
    fn name(&self) -> &'static str {
        "dns-config-update"
    }

    fn targets(&self) -> Vec<String> {
        vec![]
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        if self.done {
            return None;
        }
        self.done = true;
        let mut data = BTreeMap::new();
        data.insert("servers".to_string(), self.servers.join("\n"));
        Some(Box::new(ApplyConfigMap {
            namespace: NAMESPACE_SYSTEM.to_string(),
            name: DNS_CONFIGMAP.to_string(),
            data,
        }))
    }
}

/// Rewrite an Endpoints object to the current address set.
pub struct EndpointsOperator {
    op_name: &'static str,
    namespace: String,
    endpoints_name: String,
    addresses: Vec<String>,
    port: u16,
    done: bool,
}

impl EndpointsOperator {
    pub fn apiserver(addresses: Vec<String>) -> Self {
        Self {
            op_name: "apiserver-endpoints-update",
            namespace: "default".to_string(),
            endpoints_name: "kubernetes".to_string(),
            addresses,
            port: 6443,
            done: false,
        }
    }

    pub fn etcd(addresses: Vec<String>) -> Self {
        Self {
            op_name: "etcd-endpoints-update",
            namespace: NAMESPACE_SYSTEM.to_string(),
            endpoints_name: ETCD_ENDPOINTS.to_string(),
            addresses,
            port: 2379,
            done: false,
        }
    }
}

impl Operator for EndpointsOperator {
    fn name(&self) -> &'static str {
        self.op_name
    }

    fn targets(&self) -> Vec<String> {
        self.addresses.clone()
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(Box::new(ApplyEndpoints {
            namespace: self.namespace.clone(),
            name: self.endpoints_name.clone(),
            addresses: self.addresses.clone(),
            port: self.port,
        }))
    }
}

/// Correct drifted Node objects, one commander per node.
pub struct NodeUpdateOperator {
    nodes: std::vec::IntoIter<NodeResource>,
    targets: Vec<String>,
}

impl NodeUpdateOperator {
    pub fn new(nodes: Vec<NodeResource>) -> Self {
        let targets = nodes.iter().map(|n| n.name.clone()).collect();
        Self {
            nodes: nodes.into_iter(),
            targets,
        }
    }
}

impl Operator for NodeUpdateOperator {
    fn name(&self) -> &'static str {
        "node-update"
    }

    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        let node = self.nodes.next()?;
        Some(Box::new(UpdateNodeObject { node }))
    }
}

/// Delete Kubernetes Node objects with no cluster counterpart.
pub struct NodeRemoveOperator {
    names: std::vec::IntoIter<String>,
    targets: Vec<String>,
}

impl NodeRemoveOperator {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            targets: names.clone(),
            names: names.into_iter(),
        }
    }
}

impl Operator for NodeRemoveOperator {
    fn name(&self) -> &'static str {
        "node-remove"
    }

    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        let name = self.names.next()?;
        Some(Box::new(DeleteNodeObject { name }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_resources_carry_the_revision_annotation() {
        let resources = static_resources();
        assert_eq!(resources.len(), 3);
        for r in &resources {
            assert_eq!(
                r["metadata"]["annotations"][REVISION_ANNOTATION],
                serde_json::json!(RESOURCE_REVISION)
            );
        }
        let (kind, ns, name) = manifest_key(&resources[0]);
        assert_eq!(kind, "ServiceAccount");
        assert_eq!(ns, "kube-system");
        assert_eq!(name, "metalops-node");
    }

    #[test]
    fn endpoints_operator_emits_exactly_one_command() {
        let mut op = EndpointsOperator::apiserver(vec!["10.0.0.1".into()]);
        let cmd = op.next_command().unwrap();
        assert_eq!(cmd.command().name, "apply-endpoints");
        assert!(op.next_command().is_none());
    }
}
