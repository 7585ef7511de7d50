//! Service boot and restart operators
//!
//! Generic operators covering every managed component except etcd (which
//! has membership semantics of its own, see `ops::etcd`). Boot brings a
//! stopped component up; restart replaces a running but outdated one.

use crate::components::{self, ImageCatalog};
use crate::ops::common::{PullImage, RemoveContainers, RunContainers, WaitHealthy, WriteFiles};
use crate::ops::{Commander, Operator};
use agent_client::{ContainerSpec, FileSpec};
use models::{Cluster, Component, Node};

/// Steps of a boot, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootStep {
    Pull,
    WriteConfig,
    Run,
    Wait,
    Done,
}

/// Bring a component up on nodes where it is not running.
pub struct BootServiceOperator {
    component: Component,
    targets: Vec<String>,
    image: String,
    specs: Vec<(String, ContainerSpec)>,
    files: Vec<(String, Vec<FileSpec>)>,
    step: BootStep,
}

impl BootServiceOperator {
    pub fn new(
        component: Component,
        nodes: &[&Node],
        cluster: &Cluster,
        images: &ImageCatalog,
    ) -> Self {
        let targets: Vec<String> = nodes.iter().map(|n| n.address.clone()).collect();
        let specs = nodes
            .iter()
            .map(|n| {
                (
                    n.address.clone(),
                    components::container_spec(component, cluster, n, images),
                )
            })
            .collect();
        let files: Vec<(String, Vec<FileSpec>)> = components::kubeconfig_file(component, cluster)
            .map(|file| {
                targets
                    .iter()
                    .map(|addr| (addr.clone(), vec![file.clone()]))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            component,
            targets,
            image: images.image(component).to_string(),
            specs,
            files,
            step: BootStep::Pull,
        }
    }

    fn op_name(component: Component) -> &'static str {
        match component {
            Component::ApiServer => "apiserver-boot",
            Component::ControllerManager => "controller-manager-boot",
            Component::KubeScheduler => "kube-scheduler-boot",
            Component::Kubelet => "kubelet-boot",
            Component::KubeProxy => "kube-proxy-boot",
            Component::ApiProxy => "apiproxy-boot",
            Component::EtcdProxy => "etcdproxy-boot",
            Component::Etcd => "etcd-boot",
        }
    }
}

impl Operator for BootServiceOperator {
    fn name(&self) -> &'static str {
        Self::op_name(self.component)
    }

    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        loop {
            match self.step {
                BootStep::Pull => {
                    self.step = BootStep::WriteConfig;
                    return Some(Box::new(PullImage {
                        image: self.image.clone(),
                        targets: self.targets.clone(),
                    }));
                }
                BootStep::WriteConfig => {
                    self.step = BootStep::Run;
                    if self.files.is_empty() {
                        continue;
                    }
                    return Some(Box::new(WriteFiles {
                        detail: format!("{} kubeconfig", self.component),
                        files: self.files.clone(),
                    }));
                }
                BootStep::Run => {
                    self.step = BootStep::Wait;
                    return Some(Box::new(RunContainers {
                        container: self.component.name().to_string(),
                        specs: self.specs.clone(),
                    }));
                }
                BootStep::Wait => {
                    self.step = BootStep::Done;
                    return Some(Box::new(WaitHealthy::new(
                        self.component,
                        self.targets.clone(),
                    )));
                }
                BootStep::Done => return None,
            }
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

/// Replace a running but outdated component with the desired parameters.
pub struct RestartServiceOperator {
    component: Component,
    targets: Vec<String>,
    specs: Vec<(String, ContainerSpec)>,
    step: RestartStep,
}

impl RestartServiceOperator {
    pub fn new(
        component: Component,
        nodes: &[&Node],
        cluster: &Cluster,
        images: &ImageCatalog,
    ) -> Self {
        let targets: Vec<String> = nodes.iter().map(|n| n.address.clone()).collect();
        let specs = nodes
            .iter()
            .map(|n| {
                (
                    n.address.clone(),
                    components::container_spec(component, cluster, n, images),
                )
            })
            .collect();
        Self {
            component,
            targets,
            specs,
            step: RestartStep::Stop,
        }
    }

    fn op_name(component: Component) -> &'static str {
        match component {
            Component::ApiServer => "apiserver-restart",
            Component::ControllerManager => "controller-manager-restart",
            Component::KubeScheduler => "kube-scheduler-restart",
            Component::Kubelet => "kubelet-restart",
            Component::KubeProxy => "kube-proxy-restart",
            Component::ApiProxy => "apiproxy-restart",
            Component::EtcdProxy => "etcdproxy-restart",
            Component::Etcd => "etcd-restart",
        }
    }
}

impl Operator for RestartServiceOperator {
    fn name(&self) -> &'static str {
        Self::op_name(self.component)
    }

    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        match self.step {
            RestartStep::Stop => {
                self.step = RestartStep::Run;
                Some(Box::new(RemoveContainers {
                    container: self.component.name().to_string(),
                    targets: self.targets.clone(),
                }))
            }
            RestartStep::Run => {
                self.step = RestartStep::Wait;
                Some(Box::new(RunContainers {
                    container: self.component.name().to_string(),
                    specs: self.specs.clone(),
                }))
            }
            RestartStep::Wait => {
                self.step = RestartStep::Done;
                Some(Box::new(WaitHealthy::new(
                    self.component,
                    self.targets.clone(),
                )))
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
    fn boot_steps_in_order_and_single_use() {
        let cluster = cluster_with_nodes(vec![node("10.0.0.1", true)]);
        let nodes: Vec<&Node> = cluster.nodes.iter().collect();
        let mut op = BootServiceOperator::new(
            Component::ApiProxy,
            &nodes,
            &cluster,
            &ImageCatalog::default(),
        );
        let names: Vec<String> = std::iter::from_fn(|| op.next_command())
            .map(|c| c.command().name)
            .collect();
        // ApiProxy has no kubeconfig, so WriteConfig is skipped
        assert_eq!(names, vec!["pull-image", "run-container", "wait-healthy"]);
        assert!(op.next_command().is_none());
    }

    #[test]
    fn kubelet_boot_writes_kubeconfig() {
        let cluster = cluster_with_nodes(vec![node("10.0.1.1", false)]);
        let nodes: Vec<&Node> = cluster.nodes.iter().collect();
        let mut op = BootServiceOperator::new(
            Component::Kubelet,
            &nodes,
            &cluster,
            &ImageCatalog::default(),
        );
        let names: Vec<String> = std::iter::from_fn(|| op.next_command())
            .map(|c| c.command().name)
            .collect();
        assert_eq!(
            names,
            vec!["pull-image", "write-files", "run-container", "wait-healthy"]
        );
    }

    #[test]
    fn restart_stops_before_running() {
        let cluster = cluster_with_nodes(vec![node("10.0.0.1", true)]);
        let nodes: Vec<&Node> = cluster.nodes.iter().collect();
        let mut op = RestartServiceOperator::new(
            Component::KubeScheduler,
            &nodes,
            &cluster,
            &ImageCatalog::default(),
        );
        let names: Vec<String> = std::iter::from_fn(|| op.next_command())
            .map(|c| c.command().name)
            .collect();
        assert_eq!(names, vec!["remove-container", "run-container", "wait-healthy"]);
    }
}
