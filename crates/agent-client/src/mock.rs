//! Mock agent client for unit testing
//!
//! Keeps per-node container, image and file tables in memory, records
//! every call for assertions, and supports failure injection so engine
//! tests can exercise mid-operation failures and unreachable nodes.

use crate::agent_trait::AgentApi;
use crate::error::AgentError;
use crate::models::{ContainerSpec, ContainerState, FileSpec};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    containers: HashMap<String, BTreeMap<String, (ContainerSpec, bool)>>,
    images: HashMap<String, HashSet<String>>,
    files: HashMap<String, BTreeMap<String, FileSpec>>,
    paths: HashMap<String, HashSet<String>>,
    health: HashMap<(String, u16), bool>,
    unreachable: HashSet<String>,
    fail_next: VecDeque<(String, String)>,
    calls: Vec<String>,
}

/// Mock agent client for testing
#[derive(Clone, Default)]
pub struct MockAgentClient {
    state: Arc<Mutex<MockState>>,
}

impl MockAgentClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a node as unreachable (every call to it fails)
    pub fn set_unreachable(&self, addr: &str) {
        self.state.lock().unwrap().unreachable.insert(addr.to_string());
    }

    /// Mark a node reachable again
    pub fn set_reachable(&self, addr: &str) {
        self.state.lock().unwrap().unreachable.remove(addr);
    }

    /// Set the response of a local health probe (defaults to healthy)
    pub fn set_health(&self, addr: &str, port: u16, healthy: bool) {
        self.state
            .lock()
            .unwrap()
            .health
            .insert((addr.to_string(), port), healthy);
    }

    /// Seed a container (for test setup)
    pub fn seed_container(&self, addr: &str, spec: ContainerSpec, running: bool) {
        self.state
            .lock()
            .unwrap()
            .containers
            .entry(addr.to_string())
            .or_default()
            .insert(spec.name.clone(), (spec, running));
    }

    /// Seed an existing path (for test setup)
    pub fn seed_path(&self, addr: &str, path: &str) {
        self.state
            .lock()
            .unwrap()
            .paths
            .entry(addr.to_string())
            .or_default()
            .insert(path.to_string());
    }

    /// Fail the next call of the named method with the given message
    pub fn fail_next(&self, method: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_next
            .push_back((method.to_string(), message.to_string()));
    }

    /// Every call made so far, "method addr detail" per entry
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Current state of a container, if it exists
    pub fn container(&self, addr: &str, name: &str) -> Option<(ContainerSpec, bool)> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(addr)
            .and_then(|t| t.get(name))
            .cloned()
    }

    /// Images pulled onto a node
    pub fn images(&self, addr: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .images
            .get(addr)
            .map(|s| {
                let mut v: Vec<String> = s.iter().cloned().collect();
                v.sort();
                v
            })
            .unwrap_or_default()
    }

    /// Files written to a node
    pub fn files(&self, addr: &str) -> Vec<FileSpec> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(addr)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    fn enter(&self, method: &str, addr: &str, detail: &str) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {} {}", method, addr, detail));
        if state.unreachable.contains(addr) {
            return Err(AgentError::Unreachable(addr.to_string()));
        }
        if let Some(pos) = state.fail_next.iter().position(|(m, _)| m == method) {
            let (_, message) = state.fail_next.remove(pos).unwrap();
            return Err(AgentError::Api {
                addr: addr.to_string(),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AgentApi for MockAgentClient {
    async fn ping(&self, addr: &str) -> Result<(), AgentError> {
        self.enter("ping", addr, "")
    }

    async fn pull_image(&self, addr: &str, image: &str) -> Result<(), AgentError> {
        self.enter("pull_image", addr, image)?;
        self.state
            .lock()
            .unwrap()
            .images
            .entry(addr.to_string())
            .or_default()
            .insert(image.to_string());
        Ok(())
    }

    async fn run_container(&self, addr: &str, spec: &ContainerSpec) -> Result<(), AgentError> {
        self.enter("run_container", addr, &spec.name)?;
        let mut state = self.state.lock().unwrap();
        let table = state.containers.entry(addr.to_string()).or_default();
        // Same spec already running is a no-op, mirroring the real agent
        if let Some((existing, true)) = table.get(&spec.name) {
            if existing == spec {
                return Ok(());
            }
        }
        table.insert(spec.name.clone(), (spec.clone(), true));
        Ok(())
    }

    async fn stop_container(&self, addr: &str, name: &str) -> Result<(), AgentError> {
        self.enter("stop_container", addr, name)?;
        let mut state = self.state.lock().unwrap();
        if let Some(table) = state.containers.get_mut(addr) {
            if let Some(entry) = table.get_mut(name) {
                entry.1 = false;
            }
        }
        Ok(())
    }

    async fn remove_container(&self, addr: &str, name: &str) -> Result<(), AgentError> {
        self.enter("remove_container", addr, name)?;
        let mut state = self.state.lock().unwrap();
        if let Some(table) = state.containers.get_mut(addr) {
            table.remove(name);
        }
        Ok(())
    }

    async fn inspect(
        &self,
        addr: &str,
        name: &str,
    ) -> Result<Option<ContainerState>, AgentError> {
        self.enter("inspect", addr, name)?;
        let state = self.state.lock().unwrap();
        Ok(state.containers.get(addr).and_then(|t| t.get(name)).map(
            |(spec, running)| ContainerState {
                running: *running,
                image: spec.image.clone(),
                args: spec.args.clone(),
                binds: spec.binds.clone(),
                env: spec.env.clone(),
            },
        ))
    }

    async fn write_files(&self, addr: &str, files: &[FileSpec]) -> Result<(), AgentError> {
        self.enter("write_files", addr, &files.len().to_string())?;
        let mut state = self.state.lock().unwrap();
        for f in files {
            state
                .paths
                .entry(addr.to_string())
                .or_default()
                .insert(f.path.clone());
            state
                .files
                .entry(addr.to_string())
                .or_default()
                .insert(f.path.clone(), f.clone());
        }
        Ok(())
    }

    async fn remove_path(&self, addr: &str, path: &str) -> Result<(), AgentError> {
        self.enter("remove_path", addr, path)?;
        let mut state = self.state.lock().unwrap();
        if let Some(paths) = state.paths.get_mut(addr) {
            paths.remove(path);
        }
        if let Some(files) = state.files.get_mut(addr) {
            files.retain(|p, _| !p.starts_with(path));
        }
        Ok(())
    }

    async fn path_exists(&self, addr: &str, path: &str) -> Result<bool, AgentError> {
        self.enter("path_exists", addr, path)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .paths
            .get(addr)
            .map(|p| p.contains(path))
            .unwrap_or(false))
    }

    async fn http_health(&self, addr: &str, port: u16, path: &str) -> Result<bool, AgentError> {
        self.enter("http_health", addr, &format!("{}{}", port, path))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .health
            .get(&(addr.to_string(), port))
            .copied()
            .unwrap_or(true))
    }
}
