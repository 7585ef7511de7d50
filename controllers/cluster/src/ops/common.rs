//! Shared commanders
//!
//! The building blocks most operators are assembled from. Multi-node
//! commanders fan out to every target in parallel and fail as a whole if
//! any sub-task fails; partial remote side effects are accepted and
//! corrected on the next tick.

use crate::error::ControllerError;
use crate::infra::Infra;
use crate::ops::{CommandDesc, Commander};
use agent_client::{ContainerSpec, FileSpec};
use futures::future::join_all;
use models::Component;
use std::time::Duration;

/// Join a fan-out, failing the whole commander when any target failed.
fn check_fanout(results: Vec<(String, Result<(), ControllerError>)>) -> Result<(), ControllerError> {
    let failures: Vec<String> = results
        .into_iter()
        .filter_map(|(target, r)| r.err().map(|e| format!("{}: {}", target, e)))
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ControllerError::Command(failures.join("; ")))
    }
}

/// Pull one image on every target node.
pub struct PullImage {
    pub image: String,
    pub targets: Vec<String>,
}

#[async_trait::async_trait]
impl Commander for PullImage {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "pull-image".to_string(),
            targets: self.targets.clone(),
            detail: self.image.clone(),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        let tasks = self.targets.iter().map(|addr| async {
            (
                addr.clone(),
                infra
                    .agent
                    .pull_image(addr, &self.image)
                    .await
                    .map_err(ControllerError::from),
            )
        });
        check_fanout(join_all(tasks).await)
    }
}

/// Start containers, one spec per target node.
pub struct RunContainers {
    pub container: String,
    pub specs: Vec<(String, ContainerSpec)>,
}

#[async_trait::async_trait]
impl Commander for RunContainers {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "run-container".to_string(),
            targets: self.specs.iter().map(|(a, _)| a.clone()).collect(),
            detail: self.container.clone(),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        let tasks = self.specs.iter().map(|(addr, spec)| async {
            (
                addr.clone(),
                infra
                    .agent
                    .run_container(addr, spec)
                    .await
                    .map_err(ControllerError::from),
            )
        });
        check_fanout(join_all(tasks).await)
    }
}

/// Stop a named container on every target node.
pub struct StopContainers {
    pub container: String,
    pub targets: Vec<String>,
}

#[async_trait::async_trait]
impl Commander for StopContainers {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "stop-container".to_string(),
            targets: self.targets.clone(),
            detail: self.container.clone(),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        let tasks = self.targets.iter().map(|addr| async {
            (
                addr.clone(),
                infra
                    .agent
                    .stop_container(addr, &self.container)
                    .await
                    .map_err(ControllerError::from),
            )
        });
        check_fanout(join_all(tasks).await)
    }
}

/// Stop and remove a named container on every target node.
pub struct RemoveContainers {
    pub container: String,
    pub targets: Vec<String>,
}

#[async_trait::async_trait]
impl Commander for RemoveContainers {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "remove-container".to_string(),
            targets: self.targets.clone(),
            detail: self.container.clone(),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        let tasks = self.targets.iter().map(|addr| async {
            (
                addr.clone(),
                infra
                    .agent
                    .remove_container(addr, &self.container)
                    .await
                    .map_err(ControllerError::from),
            )
        });
        check_fanout(join_all(tasks).await)
    }
}

/// Write files, per-target file sets.
pub struct WriteFiles {
    pub detail: String,
    pub files: Vec<(String, Vec<FileSpec>)>,
}

#[async_trait::async_trait]
impl Commander for WriteFiles {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "write-files".to_string(),
            targets: self.files.iter().map(|(a, _)| a.clone()).collect(),
            detail: self.detail.clone(),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        let tasks = self.files.iter().map(|(addr, files)| async {
            (
                addr.clone(),
                infra
                    .agent
                    .write_files(addr, files)
                    .await
                    .map_err(ControllerError::from),
            )
        });
        check_fanout(join_all(tasks).await)
    }
}

/// Recursively remove a path on every target node.
pub struct RemovePath {
    pub path: String,
    pub targets: Vec<String>,
}

#[async_trait::async_trait]
impl Commander for RemovePath {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "remove-path".to_string(),
            targets: self.targets.clone(),
            detail: self.path.clone(),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        let tasks = self.targets.iter().map(|addr| async {
            (
                addr.clone(),
                infra
                    .agent
                    .remove_path(addr, &self.path)
                    .await
                    .map_err(ControllerError::from),
            )
        });
        check_fanout(join_all(tasks).await)
    }
}

/// Poll a component's health endpoint on every target until all answer
/// healthy, with bounded retries and a fixed sleep between attempts.
pub struct WaitHealthy {
    pub component: Component,
    pub targets: Vec<String>,
    pub retries: u32,
    pub interval: Duration,
}

impl WaitHealthy {
    pub fn new(component: Component, targets: Vec<String>) -> Self {
        Self {
            component,
            targets,
            retries: 30,
            interval: Duration::from_secs(2),
        }
    }

    fn health_path(component: Component) -> &'static str {
        match component {
            Component::Etcd => "/health",
            Component::ApiServer => "/livez",
            Component::ApiProxy | Component::EtcdProxy => "/health",
            _ => "/healthz",
        }
    }
}

#[async_trait::async_trait]
impl Commander for WaitHealthy {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "wait-healthy".to_string(),
            targets: self.targets.clone(),
            detail: self.component.name().to_string(),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        let port = self.component.health_port();
        let path = Self::health_path(self.component);
        let mut pending: Vec<String> = self.targets.clone();
        for _ in 0..self.retries {
            let probes = pending.iter().map(|addr| async {
                (
                    addr.clone(),
                    infra.agent.http_health(addr, port, path).await.unwrap_or(false),
                )
            });
            pending = join_all(probes)
                .await
                .into_iter()
                .filter_map(|(addr, healthy)| (!healthy).then_some(addr))
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            tokio::time::sleep(self.interval).await;
        }
        Err(ControllerError::Command(format!(
            "{} not healthy on {} within {} attempts",
            self.component,
            pending.join(","),
            self.retries
        )))
    }
}
