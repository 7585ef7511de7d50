//! Built-in component parameters
//!
//! The desired image and start parameters for every managed component,
//! constructed per reconciliation run as one immutable catalog value and
//! passed down through the infra handle. The node filter compares these
//! against what is actually running to detect configuration drift.
//!
//! Some flags are legitimately set only at first boot (etcd cluster
//! bootstrap flags, kubelet registration taints); they are listed here
//! so a normal restart is not mistaken for drift.

use agent_client::ContainerSpec;
use models::{Cluster, Component, Mount, Node, ServiceParams};
use std::collections::BTreeMap;

/// Host directory holding component certificates.
pub const CERT_DIR: &str = "/etc/metalops/pki";
/// Host directory holding generated kubeconfig files.
pub const KUBECONFIG_DIR: &str = "/etc/metalops/kubeconfig";

/// Immutable image table for one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCatalog {
    pub etcd: String,
    pub apiserver: String,
    pub controller_manager: String,
    pub kube_scheduler: String,
    pub kubelet: String,
    pub kube_proxy: String,
    /// Image providing the apiproxy/etcdproxy reverse proxies
    pub tools: String,
    pub coredns: String,
    pub etcdbackup: String,
}

impl Default for ImageCatalog {
    fn default() -> Self {
        ImageCatalog {
            etcd: "quay.io/coreos/etcd:v3.5.21".to_string(),
            apiserver: "registry.k8s.io/kube-apiserver:v1.30.11".to_string(),
            controller_manager: "registry.k8s.io/kube-controller-manager:v1.30.11".to_string(),
            kube_scheduler: "registry.k8s.io/kube-scheduler:v1.30.11".to_string(),
            kubelet: "registry.k8s.io/kubelet:v1.30.11".to_string(),
            kube_proxy: "registry.k8s.io/kube-proxy:v1.30.11".to_string(),
            tools: "ghcr.io/microscaler/metalops-tools:1.4.2".to_string(),
            coredns: "registry.k8s.io/coredns/coredns:v1.11.3".to_string(),
            etcdbackup: "ghcr.io/microscaler/metalops-etcdbackup:1.4.2".to_string(),
        }
    }
}

impl ImageCatalog {
    /// Image desired for a component.
    pub fn image(&self, component: Component) -> &str {
        match component {
            Component::Etcd => &self.etcd,
            Component::ApiServer => &self.apiserver,
            Component::ControllerManager => &self.controller_manager,
            Component::KubeScheduler => &self.kube_scheduler,
            Component::Kubelet => &self.kubelet,
            Component::KubeProxy => &self.kube_proxy,
            Component::ApiProxy | Component::EtcdProxy => &self.tools,
        }
    }
}

/// Flag names only present on a container's very first boot. Compared
/// flags are matched on the part before `=`.
pub fn first_boot_flags(component: Component) -> &'static [&'static str] {
    match component {
        Component::Etcd => &[
            "--initial-cluster",
            "--initial-cluster-state",
            "--initial-cluster-token",
        ],
        Component::Kubelet => &["--register-with-taints"],
        _ => &[],
    }
}

/// Strip first-boot-only flags from an argument list before comparison.
pub fn strip_first_boot(component: Component, args: &[String]) -> Vec<String> {
    let flags = first_boot_flags(component);
    args.iter()
        .filter(|a| {
            let name = a.split('=').next().unwrap_or(a);
            !flags.contains(&name)
        })
        .cloned()
        .collect()
}

fn peer_url(addr: &str) -> String {
    format!("https://{}:2380", addr)
}

/// etcd `--initial-cluster` value covering every control-plane node.
pub fn etcd_initial_cluster(cluster: &Cluster) -> String {
    cluster
        .control_plane_nodes()
        .map(|n| format!("{}={}", n.address, peer_url(&n.address)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Built-in arguments for a component on a node, excluding first-boot
/// flags (see [`first_boot_args`]).
pub fn built_in_args(component: Component, cluster: &Cluster, node: &Node) -> Vec<String> {
    let addr = &node.address;
    match component {
        Component::Etcd => vec![
            format!("--name={}", addr),
            format!("--data-dir={}", cluster.options.etcd.data_dir),
            format!("--listen-peer-urls=https://0.0.0.0:2380"),
            format!("--listen-client-urls=https://0.0.0.0:2379"),
            format!("--advertise-client-urls=https://{}:2379", addr),
            format!("--initial-advertise-peer-urls={}", peer_url(addr)),
            format!("--cert-file={}/etcd/server.crt", CERT_DIR),
            format!("--key-file={}/etcd/server.key", CERT_DIR),
            format!("--peer-cert-file={}/etcd/peer.crt", CERT_DIR),
            format!("--peer-key-file={}/etcd/peer.key", CERT_DIR),
            format!("--trusted-ca-file={}/etcd/ca.crt", CERT_DIR),
            format!("--peer-trusted-ca-file={}/etcd/ca-peer.crt", CERT_DIR),
            "--client-cert-auth=true".to_string(),
            "--peer-client-cert-auth=true".to_string(),
        ],
        Component::ApiServer => vec![
            "kube-apiserver".to_string(),
            // Reach etcd through the local reverse proxy so apiserver
            // survives individual member failures
            format!("--etcd-servers=https://127.0.0.1:{}", Component::EtcdProxy.health_port()),
            format!("--etcd-cafile={}/etcd/ca.crt", CERT_DIR),
            format!("--etcd-certfile={}/apiserver/etcd-client.crt", CERT_DIR),
            format!("--etcd-keyfile={}/apiserver/etcd-client.key", CERT_DIR),
            format!("--service-cluster-ip-range={}", cluster.options.service_subnet),
            format!("--advertise-address={}", addr),
            "--secure-port=6443".to_string(),
            format!("--tls-cert-file={}/apiserver/server.crt", CERT_DIR),
            format!("--tls-private-key-file={}/apiserver/server.key", CERT_DIR),
            format!("--client-ca-file={}/apiserver/ca.crt", CERT_DIR),
            "--allow-privileged=true".to_string(),
            "--authorization-mode=Node,RBAC".to_string(),
        ],
        Component::ControllerManager => vec![
            "kube-controller-manager".to_string(),
            format!("--kubeconfig={}/controller-manager.conf", KUBECONFIG_DIR),
            format!("--cluster-name={}", cluster.name),
            format!("--service-account-private-key-file={}/apiserver/sa.key", CERT_DIR),
            format!("--root-ca-file={}/apiserver/ca.crt", CERT_DIR),
            "--use-service-account-credentials=true".to_string(),
            "--leader-elect=true".to_string(),
        ],
        Component::KubeScheduler => vec![
            "kube-scheduler".to_string(),
            format!("--kubeconfig={}/scheduler.conf", KUBECONFIG_DIR),
            "--leader-elect=true".to_string(),
        ],
        Component::Kubelet => vec![
            "kubelet".to_string(),
            format!("--kubeconfig={}/kubelet.conf", KUBECONFIG_DIR),
            format!("--hostname-override={}", addr),
            "--config=/etc/kubernetes/kubelet/config.yml".to_string(),
            "--container-runtime-endpoint=unix:///run/containerd/containerd.sock".to_string(),
        ],
        Component::KubeProxy => vec![
            "kube-proxy".to_string(),
            format!("--kubeconfig={}/proxy.conf", KUBECONFIG_DIR),
            format!("--hostname-override={}", addr),
            "--proxy-mode=ipvs".to_string(),
        ],
        Component::ApiProxy => {
            let mut args = vec![
                "apiproxy".to_string(),
                format!("--listen=127.0.0.1:{}", Component::ApiProxy.health_port()),
            ];
            args.extend(
                cluster
                    .control_plane_nodes()
                    .map(|n| format!("--upstream={}:6443", n.address)),
            );
            args
        }
        Component::EtcdProxy => {
            let mut args = vec![
                "etcdproxy".to_string(),
                format!("--listen=127.0.0.1:{}", Component::EtcdProxy.health_port()),
            ];
            args.extend(
                cluster
                    .control_plane_nodes()
                    .map(|n| format!("--upstream={}:2379", n.address)),
            );
            args
        }
    }
}

/// First-boot-only arguments for a component on a node. Appended to the
/// built-in arguments when the container is created, never considered in
/// drift comparison.
pub fn first_boot_args(component: Component, cluster: &Cluster, node: &Node) -> Vec<String> {
    match component {
        Component::Etcd => vec![
            format!("--initial-cluster={}", etcd_initial_cluster(cluster)),
            "--initial-cluster-state=new".to_string(),
            format!("--initial-cluster-token={}", cluster.name),
        ],
        Component::Kubelet => {
            let taints: Vec<String> = node
                .taints
                .iter()
                .map(|t| {
                    format!(
                        "{}={}:{}",
                        t.key,
                        t.value.as_deref().unwrap_or(""),
                        t.effect
                    )
                })
                .collect();
            if taints.is_empty() {
                vec![]
            } else {
                vec![format!("--register-with-taints={}", taints.join(","))]
            }
        }
        _ => vec![],
    }
}

fn built_in_binds(component: Component, cluster: &Cluster) -> Vec<Mount> {
    let pki = Mount {
        source: CERT_DIR.to_string(),
        destination: CERT_DIR.to_string(),
        read_only: true,
    };
    match component {
        Component::Etcd => vec![
            pki,
            Mount {
                source: cluster.options.etcd.data_dir.clone(),
                destination: cluster.options.etcd.data_dir.clone(),
                read_only: false,
            },
        ],
        Component::ApiServer => vec![pki],
        Component::ControllerManager | Component::KubeScheduler => vec![
            pki,
            Mount {
                source: KUBECONFIG_DIR.to_string(),
                destination: KUBECONFIG_DIR.to_string(),
                read_only: true,
            },
        ],
        Component::Kubelet | Component::KubeProxy => vec![
            Mount {
                source: KUBECONFIG_DIR.to_string(),
                destination: KUBECONFIG_DIR.to_string(),
                read_only: true,
            },
            Mount {
                source: "/var/lib/kubelet".to_string(),
                destination: "/var/lib/kubelet".to_string(),
                read_only: false,
            },
        ],
        Component::ApiProxy | Component::EtcdProxy => vec![pki],
    }
}

/// The desired built-in parameters for drift comparison: arguments minus
/// first-boot flags, plus built-in binds.
pub fn desired_params(component: Component, cluster: &Cluster, node: &Node) -> ServiceParams {
    ServiceParams {
        extra_args: built_in_args(component, cluster, node),
        extra_binds: built_in_binds(component, cluster),
        extra_env: BTreeMap::new(),
    }
}

/// How an etcd container is being brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtcdMode {
    /// First boot of a brand-new cluster
    New,
    /// Joining an existing cluster as a freshly-added member
    Join,
    /// Restarting a member that already has data on disk
    Restart,
}

/// Container spec for the etcd member on a node. The initial-cluster
/// flags depend on how the member is being brought up; a plain restart
/// carries none (the data directory is authoritative).
pub fn etcd_container_spec(
    cluster: &Cluster,
    node: &Node,
    catalog: &ImageCatalog,
    mode: EtcdMode,
) -> ContainerSpec {
    let extra = cluster.component_params(Component::Etcd.name());
    let mut args = built_in_args(Component::Etcd, cluster, node);
    match mode {
        EtcdMode::New => args.extend(first_boot_args(Component::Etcd, cluster, node)),
        EtcdMode::Join => args.extend([
            format!("--initial-cluster={}", etcd_initial_cluster(cluster)),
            "--initial-cluster-state=existing".to_string(),
            format!("--initial-cluster-token={}", cluster.name),
        ]),
        EtcdMode::Restart => {}
    }
    args.extend(extra.extra_args.iter().cloned());
    let mut binds = built_in_binds(Component::Etcd, cluster);
    binds.extend(extra.extra_binds.iter().cloned());
    ContainerSpec {
        name: Component::Etcd.name().to_string(),
        image: catalog.etcd.clone(),
        args,
        binds,
        env: extra.extra_env,
    }
}

/// Kubeconfig written before booting a component, if it needs one.
/// Control-plane components talk to the local API server; node agents go
/// through the apiproxy so they survive individual API-server failures.
pub fn kubeconfig_file(component: Component, cluster: &Cluster) -> Option<agent_client::FileSpec> {
    let (file, server, user) = match component {
        Component::ControllerManager => (
            "controller-manager.conf",
            "https://127.0.0.1:6443".to_string(),
            "system:kube-controller-manager",
        ),
        Component::KubeScheduler => (
            "scheduler.conf",
            "https://127.0.0.1:6443".to_string(),
            "system:kube-scheduler",
        ),
        Component::Kubelet => (
            "kubelet.conf",
            format!("https://127.0.0.1:{}", Component::ApiProxy.health_port()),
            "system:node",
        ),
        Component::KubeProxy => (
            "proxy.conf",
            format!("https://127.0.0.1:{}", Component::ApiProxy.health_port()),
            "system:kube-proxy",
        ),
        _ => return None,
    };
    let content = format!(
        concat!(
            "apiVersion: v1\n",
            "kind: Config\n",
            "clusters:\n",
            "- name: {cluster}\n",
            "  cluster:\n",
            "    server: {server}\n",
            "    certificate-authority: {cert_dir}/apiserver/ca.crt\n",
            "users:\n",
            "- name: {user}\n",
            "  user:\n",
            "    client-certificate: {cert_dir}/{user_file}/client.crt\n",
            "    client-key: {cert_dir}/{user_file}/client.key\n",
            "contexts:\n",
            "- name: default\n",
            "  context:\n",
            "    cluster: {cluster}\n",
            "    user: {user}\n",
            "current-context: default\n",
        ),
        cluster = cluster.name,
        server = server,
        user = user,
        user_file = component.name(),
        cert_dir = CERT_DIR,
    );
    Some(agent_client::FileSpec {
        path: format!("{}/{}", KUBECONFIG_DIR, file),
        mode: 0o600,
        content,
    })
}

/// The full container spec used when (re)starting a component: built-in
/// arguments, first-boot flags, then operator-configured extras.
pub fn container_spec(
    component: Component,
    cluster: &Cluster,
    node: &Node,
    catalog: &ImageCatalog,
) -> ContainerSpec {
    let extra = cluster.component_params(component.name());
    let mut args = built_in_args(component, cluster, node);
    args.extend(first_boot_args(component, cluster, node));
    args.extend(extra.extra_args.iter().cloned());
    let mut binds = built_in_binds(component, cluster);
    binds.extend(extra.extra_binds.iter().cloned());
    ContainerSpec {
        name: component.name().to_string(),
        image: catalog.image(component).to_string(),
        args,
        binds,
        env: extra.extra_env,
    }
}
