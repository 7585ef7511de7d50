//! Kubernetes API access
//!
//! Production implementation of [`KubeApi`]. The client is built lazily:
//! during early bootstrap the API server the engine itself manages does
//! not exist yet, so construction failures surface as "not ready" and
//! ordinary errors, never as start-up failures.

use crate::error::ControllerError;
use crate::infra::{KubeApi, REVISION_ANNOTATION};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Node, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use models::NodeResource;
use std::collections::BTreeMap;
use tokio::sync::OnceCell;
use tracing::debug;

/// Field manager name used for server-side apply.
const FIELD_MANAGER: &str = "metalops";

/// Lazily-connected Kubernetes client.
#[derive(Default)]
pub struct KubeClient {
    inner: OnceCell<Client>,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient").finish_non_exhaustive()
    }
}

fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), ControllerError> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl KubeClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<Client, ControllerError> {
        let client = self
            .inner
            .get_or_try_init(|| async { Client::try_default().await })
            .await?;
        Ok(client.clone())
    }

    fn apply_params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER).force()
    }

    async fn annotation_of<K>(
        &self,
        api: Api<K>,
        name: &str,
    ) -> Result<Option<String>, ControllerError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        Ok(api
            .get_opt(name)
            .await?
            .and_then(|o| o.annotations().get(REVISION_ANNOTATION).cloned()))
    }
}

/// Run a closure with a typed Api for one of the managed kinds.
macro_rules! with_kind_api {
    ($self:ident, $kind:expr, $namespace:expr, $f:ident $(, $arg:expr)*) => {{
        let client = $self.client().await?;
        match $kind {
            "ServiceAccount" => $self.$f(Api::<ServiceAccount>::namespaced(client, $namespace) $(, $arg)*).await,
            "ClusterRole" => $self.$f(Api::<ClusterRole>::all(client) $(, $arg)*).await,
            "ClusterRoleBinding" => $self.$f(Api::<ClusterRoleBinding>::all(client) $(, $arg)*).await,
            "ConfigMap" => $self.$f(Api::<ConfigMap>::namespaced(client, $namespace) $(, $arg)*).await,
            "Secret" => $self.$f(Api::<Secret>::namespaced(client, $namespace) $(, $arg)*).await,
            "Service" => $self.$f(Api::<Service>::namespaced(client, $namespace) $(, $arg)*).await,
            "CronJob" => $self.$f(Api::<CronJob>::namespaced(client, $namespace) $(, $arg)*).await,
            "Pod" => $self.$f(Api::<Pod>::namespaced(client, $namespace) $(, $arg)*).await,
            other => Err(ControllerError::InvalidConfig(format!(
                "unmanaged resource kind: {}",
                other
            ))),
        }
    }};
}

#[async_trait::async_trait]
impl KubeApi for KubeClient {
    async fn is_ready(&self) -> bool {
        match self.client().await {
            Ok(client) => client.apiserver_version().await.is_ok(),
            Err(e) => {
                debug!("Kubernetes client unavailable: {}", e);
                false
            }
        }
    }

    async fn list_nodes(&self) -> Result<Vec<NodeResource>, ControllerError> {
        let api: Api<Node> = Api::all(self.client().await?);
        let nodes = api.list(&Default::default()).await?;
        Ok(nodes
            .items
            .into_iter()
            .map(|n| NodeResource {
                name: n.name_any(),
                labels: n.labels().clone(),
                annotations: n.annotations().clone(),
                taints: n.spec.and_then(|s| s.taints).unwrap_or_default(),
            })
            .collect())
    }

    async fn update_node(&self, node: &NodeResource) -> Result<(), ControllerError> {
        let api: Api<Node> = Api::all(self.client().await?);
        let mut current = api.get(&node.name).await?;
        current.metadata.labels = Some(node.labels.clone());
        current.metadata.annotations = Some(node.annotations.clone());
        if let Some(spec) = current.spec.as_mut() {
            spec.taints = if node.taints.is_empty() {
                None
            } else {
                Some(node.taints.clone())
            };
        }
        api.replace(&node.name, &PostParams::default(), &current)
            .await?;
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> Result<(), ControllerError> {
        let api: Api<Node> = Api::all(self.client().await?);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ControllerError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client().await?, namespace);
        Ok(api.get_opt(name).await?.map(|cm| cm.data.unwrap_or_default()))
    }

    async fn apply_configmap(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client().await?, namespace);
        let manifest = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": namespace },
            "data": data,
        });
        api.patch(name, &Self::apply_params(), &Patch::Apply(&manifest))
            .await?;
        Ok(())
    }

    async fn get_endpoints(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Vec<String>>, ControllerError> {
        let api: Api<Endpoints> = Api::namespaced(self.client().await?, namespace);
        Ok(api.get_opt(name).await?.map(|ep| {
            let mut addrs: Vec<String> = ep
                .subsets
                .unwrap_or_default()
                .into_iter()
                .flat_map(|s| s.addresses.unwrap_or_default())
                .map(|a| a.ip)
                .collect();
            addrs.sort();
            addrs
        }))
    }

    async fn apply_endpoints(
        &self,
        namespace: &str,
        name: &str,
        addresses: &[String],
        port: u16,
    ) -> Result<(), ControllerError> {
        let api: Api<Endpoints> = Api::namespaced(self.client().await?, namespace);
        let manifest = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Endpoints",
            "metadata": { "name": name, "namespace": namespace },
            "subsets": [{
                "addresses": addresses.iter().map(|a| serde_json::json!({ "ip": a })).collect::<Vec<_>>(),
                "ports": [{ "port": port, "protocol": "TCP" }],
            }],
        });
        api.patch(name, &Self::apply_params(), &Patch::Apply(&manifest))
            .await?;
        Ok(())
    }

    async fn apply_manifest(&self, manifest: &serde_json::Value) -> Result<(), ControllerError> {
        let kind = manifest["kind"]
            .as_str()
            .ok_or_else(|| ControllerError::InvalidConfig("manifest missing kind".into()))?
            .to_string();
        let name = manifest["metadata"]["name"]
            .as_str()
            .ok_or_else(|| ControllerError::InvalidConfig("manifest missing name".into()))?
            .to_string();
        let namespace = manifest["metadata"]["namespace"]
            .as_str()
            .unwrap_or("default")
            .to_string();
        with_kind_api!(self, kind.as_str(), &namespace, apply_into, &name, manifest)
    }

    async fn delete_resource(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError> {
        with_kind_api!(self, kind, namespace, delete_in, name)
    }

    async fn resource_exists(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ControllerError> {
        with_kind_api!(self, kind, namespace, exists_named, name)
    }

    async fn get_manifest_revision(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ControllerError> {
        with_kind_api!(self, kind, namespace, annotation_of, name)
    }

    async fn get_cronjob_schedule(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ControllerError> {
        let api: Api<CronJob> = Api::namespaced(self.client().await?, namespace);
        Ok(api
            .get_opt(name)
            .await?
            .and_then(|cj| cj.spec.map(|s| s.schedule)))
    }
}

impl KubeClient {
    async fn apply_into<K>(
        &self,
        api: Api<K>,
        name: &str,
        manifest: &serde_json::Value,
    ) -> Result<(), ControllerError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        api.patch(name, &Self::apply_params(), &Patch::Apply(manifest))
            .await?;
        Ok(())
    }

    async fn delete_in<K>(&self, api: Api<K>, name: &str) -> Result<(), ControllerError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn exists_named<K>(&self, api: Api<K>, name: &str) -> Result<bool, ControllerError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        Ok(api.get_opt(name).await?.is_some())
    }
}
