//! Decommission operators
//!
//! A node demoted out of the control plane may still run control-plane
//! services. They are stopped and removed here; the etcd member itself
//! is handled by the destroy operator in `ops::etcd`, which also drops
//! membership and data.

use crate::ops::common::RemoveContainers;
use crate::ops::{Commander, Operator};
use models::{Component, Node};

/// Stop and remove one control-plane-only component on demoted nodes.
pub struct StopComponentOperator {
    component: Component,
    targets: Vec<String>,
    done: bool,
}

impl StopComponentOperator {
    pub fn new(component: Component, nodes: &[&Node]) -> Self {
        Self {
            component,
            targets: nodes.iter().map(|n| n.address.clone()).collect(),
            done: false,
        }
    }
}

impl Operator for StopComponentOperator {
    fn name(&self) -> &'static str {
        match self.component {
            Component::ApiServer => "apiserver-decommission",
            Component::ControllerManager => "controller-manager-decommission",
            Component::KubeScheduler => "kube-scheduler-decommission",
            Component::EtcdProxy => "etcdproxy-decommission",
            _ => "decommission",
        }
    }

    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(Box::new(RemoveContainers {
            container: self.component.name().to_string(),
            targets: self.targets.clone(),
        }))
    }
}
