//! Machine scheduler
//!
//! Turns the machine pool into a concrete control-plane/worker node set
//! honoring the stored constraints. One pass applies at most one rule of
//! a fixed priority ladder and returns the rewritten cluster together
//! with a human-readable change list; a pass that finds nothing to do
//! reports `Unchanged` so the controller can skip the persisted write.
//!
//! Rack-allocation counters are updated incrementally inside a pass, so
//! every placement decision sees the effect of the previous one.

pub mod scoring;

mod scheduler_test;

pub use scoring::ScoringConfig;

use chrono::{DateTime, Utc};
use models::{Cluster, Constraints, Machine, MachineState, Node, NodeTemplate};
use scoring::score;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Hard precondition failures; the scheduling pass aborts with no change
/// and is retried on the next tick.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Dropping unreachable members would leave at most half of the
    /// previous control-plane set
    #[error(
        "removing unreachable control-plane machines would break quorum ({remaining}/{total} would remain)"
    )]
    QuorumBreak { remaining: usize, total: usize },

    /// No healthy machine available to reach the control-plane count
    #[error("no machine available to satisfy the control-plane count")]
    NoControlPlaneCandidate,

    /// No healthy machine available to reach the worker minimum
    #[error("no machine available to satisfy the worker minimum")]
    NoWorkerCandidate,

    /// The cluster template lacks a required role entry
    #[error("cluster template has no {0} entry")]
    NoTemplate(&'static str),
}

/// Scheduler tunables.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long a retiring worker keeps its place before removal
    pub retire_grace: chrono::Duration,
    pub scoring: ScoringConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            retire_grace: chrono::Duration::hours(1),
            scoring: ScoringConfig::default(),
        }
    }
}

/// Result of one scheduling pass. An unchanged cluster is distinguishable
/// from a changed one so the controller can skip a redundant write.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Unchanged,
    Changed {
        cluster: Cluster,
        /// Human-readable change list for audit, e.g.
        /// "add new worker: 10.0.1.5"
        changes: Vec<String>,
    },
}

struct Pass<'a> {
    base: &'a Cluster,
    constraints: &'a Constraints,
    by_addr: HashMap<String, &'a Machine>,
    machines: &'a [Machine],
    now: DateTime<Utc>,
    config: &'a SchedulerConfig,
    cp: Vec<Node>,
    workers: Vec<Node>,
    rack_counts: HashMap<u32, usize>,
    changes: Vec<String>,
}

impl<'a> Pass<'a> {
    fn new(
        base: &'a Cluster,
        constraints: &'a Constraints,
        machines: &'a [Machine],
        now: DateTime<Utc>,
        config: &'a SchedulerConfig,
    ) -> Self {
        let by_addr: HashMap<String, &Machine> = machines
            .iter()
            .filter_map(|m| m.primary_address().map(|a| (a.to_string(), m)))
            .collect();
        let cp: Vec<Node> = base.control_plane_nodes().cloned().collect();
        let workers: Vec<Node> = base.worker_nodes().cloned().collect();
        let mut rack_counts = HashMap::new();
        for node in cp.iter().chain(workers.iter()) {
            if let Some(m) = by_addr.get(&node.address) {
                *rack_counts.entry(m.spec.rack).or_insert(0) += 1;
            }
        }
        Self {
            base,
            constraints,
            by_addr,
            machines,
            now,
            config,
            cp,
            workers,
            rack_counts,
            changes: vec![],
        }
    }

    fn machine_of(&self, node: &Node) -> Option<&'a Machine> {
        self.by_addr.get(&node.address).copied()
    }

    fn rack_count(&self, machine: &Machine) -> usize {
        self.rack_counts.get(&machine.spec.rack).copied().unwrap_or(0)
    }

    fn count_rack(&mut self, machine: &Machine, delta: i64) {
        let entry = self.rack_counts.entry(machine.spec.rack).or_insert(0);
        *entry = (*entry as i64 + delta).max(0) as usize;
    }

    fn score_machine(&self, machine: &Machine) -> i64 {
        score(machine, self.rack_count(machine), self.now, &self.config.scoring)
    }

    /// Healthy machines not yet bound into the cluster, inventory order.
    fn unused_healthy(&self) -> Vec<&'a Machine> {
        let allocated: HashSet<&str> = self
            .cp
            .iter()
            .chain(self.workers.iter())
            .map(|n| n.address.as_str())
            .collect();
        self.machines
            .iter()
            .filter(|m| m.status.state.is_healthy())
            .filter(|m| {
                m.primary_address()
                    .map(|a| !allocated.contains(a.to_string().as_str()))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Best candidate for addition: highest score, earliest on ties.
    fn best_machine(&self, candidates: &[&'a Machine]) -> Option<&'a Machine> {
        let mut best: Option<(&'a Machine, i64)> = None;
        for &m in candidates {
            let s = self.score_machine(m);
            if best.map(|(_, bs)| s > bs).unwrap_or(true) {
                best = Some((m, s));
            }
        }
        best.map(|(m, _)| m)
    }

    /// Worst member for removal: lowest score, latest on ties, so
    /// removal order is the exact reverse of addition order.
    fn worst_node(&self, nodes: &[Node]) -> Option<usize> {
        let mut worst: Option<(usize, i64)> = None;
        for (i, node) in nodes.iter().enumerate() {
            let s = self
                .machine_of(node)
                .map(|m| self.score_machine(m))
                .unwrap_or(i64::MIN);
            if worst.map(|(_, ws)| s <= ws).unwrap_or(true) {
                worst = Some((i, s));
            }
        }
        worst.map(|(i, _)| i)
    }

    fn cp_template(&self) -> Result<&'a NodeTemplate, SchedulerError> {
        self.base
            .template
            .iter()
            .find(|t| t.control_plane)
            .ok_or(SchedulerError::NoTemplate("control-plane"))
    }

    /// Worker role for the next instantiation: the role with the fewest
    /// instances relative to its weight, template order on ties.
    fn worker_template(&self) -> Result<&'a NodeTemplate, SchedulerError> {
        let worker_templates: Vec<&NodeTemplate> = self
            .base
            .template
            .iter()
            .filter(|t| !t.control_plane)
            .collect();
        if worker_templates.is_empty() {
            return Err(SchedulerError::NoTemplate("worker"));
        }
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for w in &self.workers {
            if let Some(role) = w.role() {
                *counts.entry(role).or_insert(0) += 1;
            }
        }
        let mut best: Option<(&NodeTemplate, f64)> = None;
        for t in worker_templates {
            let count = counts.get(t.role.as_str()).copied().unwrap_or(0);
            let weight = if t.weight > 0.0 { t.weight } else { 1.0 };
            let ratio = count as f64 / weight;
            if best.map(|(_, br)| ratio < br).unwrap_or(true) {
                best = Some((t, ratio));
            }
        }
        best.map(|(t, _)| t).ok_or(SchedulerError::NoTemplate("worker"))
    }

    fn add_control_plane(&mut self, machine: &'a Machine) -> Result<(), SchedulerError> {
        let template = self.cp_template()?;
        let node = Node::from_machine(machine, template, true);
        self.changes
            .push(format!("add new control plane: {}", node.address));
        self.count_rack(machine, 1);
        self.cp.push(node);
        Ok(())
    }

    fn add_worker(&mut self, machine: &'a Machine) -> Result<(), SchedulerError> {
        let template = self.worker_template()?;
        let node = Node::from_machine(machine, template, false);
        self.changes.push(format!("add new worker: {}", node.address));
        self.count_rack(machine, 1);
        self.workers.push(node);
        Ok(())
    }

    /// Turn a worker node into a control-plane node.
    fn promote_worker(&mut self, index: usize) -> Result<(), SchedulerError> {
        let worker = self.workers.remove(index);
        let template = self.cp_template()?;
        let node = match self.machine_of(&worker) {
            Some(m) => Node::from_machine(m, template, true),
            None => Node {
                control_plane: true,
                ..worker.clone()
            },
        };
        self.changes
            .push(format!("promote a worker: {}", node.address));
        self.cp.push(node);
        Ok(())
    }

    /// Turn a control-plane node into a worker, or drop it when the
    /// worker maximum leaves no headroom.
    fn demote_or_remove(&mut self, index: usize) -> Result<(), SchedulerError> {
        let node = self.cp.remove(index);
        if self.constraints.worker_headroom(self.workers.len()) > 0 {
            let template = self.worker_template()?;
            let demoted = match self.machine_of(&node) {
                Some(m) => Node::from_machine(m, template, false),
                None => Node {
                    control_plane: false,
                    ..node.clone()
                },
            };
            self.changes
                .push(format!("demote a control plane: {}", demoted.address));
            self.workers.push(demoted);
        } else {
            self.changes
                .push(format!("remove a control plane: {}", node.address));
            if let Some(m) = self.machine_of(&node) {
                self.count_rack(m, -1);
            }
        }
        Ok(())
    }

    // Ladder step 1: drop nodes whose machine vanished or is unreachable.
    fn remove_unreachable(&mut self) -> Result<bool, SchedulerError> {
        let gone = |by_addr: &HashMap<String, &Machine>, node: &Node| match by_addr.get(&node.address)
        {
            None => true,
            Some(m) => m.status.state == MachineState::Unreachable,
        };

        let cp_total = self.cp.len();
        let cp_gone: Vec<usize> = (0..self.cp.len())
            .filter(|&i| gone(&self.by_addr, &self.cp[i]))
            .collect();
        let remaining = cp_total - cp_gone.len();
        if !cp_gone.is_empty() && remaining * 2 <= cp_total {
            return Err(SchedulerError::QuorumBreak {
                remaining,
                total: cp_total,
            });
        }

        let mut applied = false;
        for i in cp_gone.into_iter().rev() {
            let node = self.cp.remove(i);
            self.changes
                .push(format!("remove unreachable machine: {}", node.address));
            if let Some(m) = self.by_addr.get(&node.address).copied() {
                self.count_rack(m, -1);
            }
            applied = true;
        }
        let worker_gone: Vec<usize> = (0..self.workers.len())
            .filter(|&i| gone(&self.by_addr, &self.workers[i]))
            .collect();
        for i in worker_gone.into_iter().rev() {
            let node = self.workers.remove(i);
            self.changes
                .push(format!("remove unreachable machine: {}", node.address));
            if let Some(m) = self.by_addr.get(&node.address).copied() {
                self.count_rack(m, -1);
            }
            applied = true;
        }
        Ok(applied)
    }

    // Ladder step 2: bring the control plane up to the desired count.
    fn increase_control_plane(&mut self) -> Result<bool, SchedulerError> {
        let desired = self.constraints.control_plane_count;
        if self.cp.len() >= desired {
            return Ok(false);
        }
        while self.cp.len() < desired {
            let unused = self.unused_healthy();
            if let Some(m) = self.best_machine(&unused) {
                self.add_control_plane(m)?;
                continue;
            }
            // No unused machine: promote a worker, but never push the
            // worker count below its minimum with no backfill available.
            if self.workers.len() <= self.constraints.minimum_workers {
                return Err(SchedulerError::NoControlPlaneCandidate);
            }
            let candidate = self
                .workers
                .iter()
                .enumerate()
                .filter(|(_, w)| {
                    self.machine_of(w)
                        .map(|m| m.status.state.is_healthy())
                        .unwrap_or(false)
                })
                .map(|(i, w)| {
                    let s = self
                        .machine_of(w)
                        .map(|m| self.score_machine(m))
                        .unwrap_or(i64::MIN);
                    (i, s)
                })
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(i, _)| i);
            match candidate {
                Some(i) => self.promote_worker(i)?,
                None => return Err(SchedulerError::NoControlPlaneCandidate),
            }
        }
        Ok(true)
    }

    // Ladder step 3: shrink the control plane to the desired count.
    fn decrease_control_plane(&mut self) -> Result<bool, SchedulerError> {
        let desired = self.constraints.control_plane_count;
        if self.cp.len() <= desired {
            return Ok(false);
        }
        while self.cp.len() > desired {
            let Some(index) = self.worst_node(&self.cp) else {
                break;
            };
            self.demote_or_remove(index)?;
        }
        Ok(true)
    }

    // Ladder step 4: replace a control-plane member whose machine left
    // the acceptable states.
    fn replace_unhealthy_control_plane(&mut self) -> Result<bool, SchedulerError> {
        let Some(pos) = self.cp.iter().position(|n| {
            self.machine_of(n)
                .map(|m| !m.status.state.is_control_plane_candidate())
                .unwrap_or(true)
        }) else {
            return Ok(false);
        };

        // Replacement candidates: unused healthy machines first, then
        // healthy workers, best score wins.
        let unused = self.unused_healthy();
        let best_unused = self.best_machine(&unused);
        let best_worker = self
            .workers
            .iter()
            .enumerate()
            .filter(|(_, w)| {
                self.machine_of(w)
                    .map(|m| m.status.state.is_healthy())
                    .unwrap_or(false)
            })
            .map(|(i, w)| {
                let s = self
                    .machine_of(w)
                    .map(|m| self.score_machine(m))
                    .unwrap_or(i64::MIN);
                (i, s)
            })
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));

        let use_worker = match (best_unused, best_worker) {
            (None, None) => {
                debug!(
                    "Control-plane member {} is unhealthy but no replacement exists",
                    self.cp[pos].address
                );
                return Ok(false);
            }
            (Some(_), None) => false,
            (None, Some((_, _))) => {
                // A worker promotion must leave the minimum satisfiable
                if self.workers.len() <= self.constraints.minimum_workers {
                    return Ok(false);
                }
                true
            }
            (Some(u), Some((_, ws))) => {
                if ws > self.score_machine(u) {
                    self.workers.len() > self.constraints.minimum_workers
                } else {
                    false
                }
            }
        };

        self.demote_or_remove(pos)?;
        if use_worker {
            let (i, _) = best_worker.unwrap_or((0, 0));
            // The demotion above may have appended to `workers`; the
            // candidate index is still valid because demotion pushes to
            // the back.
            self.promote_worker(i)?;
        } else if let Some(m) = best_unused {
            self.add_control_plane(m)?;
        }
        Ok(true)
    }

    // Ladder step 5: bring workers up to the minimum.
    fn increase_workers(&mut self) -> Result<bool, SchedulerError> {
        if self.workers.len() >= self.constraints.minimum_workers {
            return Ok(false);
        }
        while self.workers.len() < self.constraints.minimum_workers {
            let unused = self.unused_healthy();
            match self.best_machine(&unused) {
                Some(m) => self.add_worker(m)?,
                None => return Err(SchedulerError::NoWorkerCandidate),
            }
        }
        Ok(true)
    }

    // Ladder step 6: let retiring workers go once their grace has passed.
    fn decrease_workers(&mut self) -> Result<bool, SchedulerError> {
        let grace_secs = self.config.retire_grace.num_seconds() as f64;
        let mut applied = false;
        loop {
            let Some(index) = self.workers.iter().position(|w| {
                self.machine_of(w)
                    .map(|m| {
                        m.status.state.is_retiring() && m.status.duration_secs >= grace_secs
                    })
                    .unwrap_or(false)
            }) else {
                break;
            };
            if self.workers.len() <= self.constraints.minimum_workers {
                // Removing would violate the minimum; backfill first
                let unused = self.unused_healthy();
                match self.best_machine(&unused) {
                    Some(m) => self.add_worker(m)?,
                    None => break,
                }
            }
            let node = self.workers.remove(index);
            self.changes.push(format!("remove a worker: {}", node.address));
            if let Some(m) = self.by_addr.get(&node.address).copied() {
                self.count_rack(m, -1);
            }
            applied = true;
        }
        Ok(applied)
    }

    // Ladder step 7: no membership change, but derived taints drifted.
    fn retaint(&mut self) -> Result<bool, SchedulerError> {
        let mut retainted = Vec::new();
        let by_addr = &self.by_addr;
        for node in self.cp.iter_mut().chain(self.workers.iter_mut()) {
            if let Some(m) = by_addr.get(&node.address) {
                if node.retaint(m.status.state) {
                    retainted.push(node.address.clone());
                }
            }
        }
        for address in &retainted {
            self.changes.push(format!("retaint: {}", address));
        }
        Ok(!retainted.is_empty())
    }

    fn build(self) -> (Cluster, Vec<String>) {
        let mut cluster = self.base.clone();
        cluster.nodes = self.cp.into_iter().chain(self.workers).collect();
        (cluster, self.changes)
    }
}

/// Generate the initial cluster from a node-less template cluster.
pub fn generate(
    base: &Cluster,
    constraints: &Constraints,
    machines: &[Machine],
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Result<(Cluster, Vec<String>), SchedulerError> {
    let mut pass = Pass::new(base, constraints, machines, now, config);
    pass.cp.clear();
    pass.workers.clear();
    pass.rack_counts.clear();

    for _ in 0..constraints.control_plane_count {
        let unused = pass.unused_healthy();
        match pass.best_machine(&unused) {
            Some(m) => pass.add_control_plane(m)?,
            None => return Err(SchedulerError::NoControlPlaneCandidate),
        }
    }
    while pass.workers.len() < constraints.minimum_workers {
        let unused = pass.unused_healthy();
        match pass.best_machine(&unused) {
            Some(m) => pass.add_worker(m)?,
            None => return Err(SchedulerError::NoWorkerCandidate),
        }
    }
    Ok(pass.build())
}

/// Recompute the cluster from the previous one. At most one ladder rule
/// applies per call; `Outcome::Unchanged` means the node set and taints
/// already satisfy the constraints.
pub fn update(
    prev: &Cluster,
    constraints: &Constraints,
    machines: &[Machine],
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Result<Outcome, SchedulerError> {
    let mut pass = Pass::new(prev, constraints, machines, now, config);

    let applied = pass.remove_unreachable()?
        || pass.increase_control_plane()?
        || pass.decrease_control_plane()?
        || pass.replace_unhealthy_control_plane()?
        || pass.increase_workers()?
        || pass.decrease_workers()?
        || pass.retaint()?;

    if applied {
        let (cluster, changes) = pass.build();
        Ok(Outcome::Changed { cluster, changes })
    } else {
        Ok(Outcome::Unchanged)
    }
}
