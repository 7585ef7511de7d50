//! Managed components
//!
//! The closed set of services the engine runs on cluster nodes. Each
//! component knows its container name, placement and local health port.

use serde::{Deserialize, Serialize};

/// A service managed by the reconciliation engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    Etcd,
    ApiServer,
    ControllerManager,
    KubeScheduler,
    Kubelet,
    KubeProxy,
    /// Reverse proxy on every node forwarding to the API servers
    ApiProxy,
    /// Reverse proxy on control-plane nodes forwarding to etcd
    EtcdProxy,
}

impl Component {
    /// Stable name used for container names, params keys and logs.
    pub fn name(self) -> &'static str {
        match self {
            Component::Etcd => "etcd",
            Component::ApiServer => "kube-apiserver",
            Component::ControllerManager => "kube-controller-manager",
            Component::KubeScheduler => "kube-scheduler",
            Component::Kubelet => "kubelet",
            Component::KubeProxy => "kube-proxy",
            Component::ApiProxy => "apiproxy",
            Component::EtcdProxy => "etcdproxy",
        }
    }

    /// Components that only ever run on control-plane nodes.
    pub fn control_plane_only(self) -> bool {
        matches!(
            self,
            Component::Etcd
                | Component::ApiServer
                | Component::ControllerManager
                | Component::KubeScheduler
                | Component::EtcdProxy
        )
    }

    /// Local port probed by the per-component health check.
    pub fn health_port(self) -> u16 {
        match self {
            Component::Etcd => 2379,
            Component::ApiServer => 6443,
            Component::ControllerManager => 10257,
            Component::KubeScheduler => 10259,
            Component::Kubelet => 10248,
            Component::KubeProxy => 10256,
            Component::ApiProxy => 18080,
            Component::EtcdProxy => 12379,
        }
    }

    /// All managed components.
    pub fn all() -> [Component; 8] {
        [
            Component::Etcd,
            Component::ApiServer,
            Component::ControllerManager,
            Component::KubeScheduler,
            Component::Kubelet,
            Component::KubeProxy,
            Component::ApiProxy,
            Component::EtcdProxy,
        ]
    }

    /// Kubernetes components in their boot order. Etcd and the proxies
    /// are handled by earlier reconciliation phases.
    pub fn kubernetes_boot_order() -> [Component; 5] {
        [
            Component::ApiServer,
            Component::ControllerManager,
            Component::KubeScheduler,
            Component::Kubelet,
            Component::KubeProxy,
        ]
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
