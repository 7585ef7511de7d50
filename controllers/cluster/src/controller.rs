//! Controller run loop
//!
//! A single elected leader drives the reconciliation cycle; every other
//! replica blocks in the election. On becoming leader the controller
//! first cancels records left running by its predecessor, then loops:
//! wait for a spec-watch wake-up or the tick interval, run one tick
//! (schedule, observe, decide, execute at most one phase's operators),
//! repeat. Losing the lease drops back into the election; only a
//! shutdown signal ends the loop.

use crate::decide::{Phase, decide_ops};
use crate::error::ControllerError;
use crate::infra::Infra;
use crate::ops::{OperatorOutcome, run_operator};
use crate::scheduler::{self, Outcome, SchedulerConfig};
use crate::server::ServerState;
use crate::status::collect_status;
use inventory_client::InventoryApi;
use models::Cluster;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use storage::{Election, Storage, StorageError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Controller tunables, read from the environment in `main`.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub tick_interval: Duration,
    pub cert_tidy_interval: Duration,
    pub scheduler: SchedulerConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            cert_tidy_interval: Duration::from_secs(3600),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// The reconciliation controller.
pub struct Controller {
    storage: Storage,
    inventory: Arc<dyn InventoryApi>,
    infra: Infra,
    config: ControllerConfig,
    state: Arc<ServerState>,
    shutdown: watch::Receiver<bool>,
}

impl Controller {
    pub fn new(
        storage: Storage,
        inventory: Arc<dyn InventoryApi>,
        infra: Infra,
        config: ControllerConfig,
        state: Arc<ServerState>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            storage,
            inventory,
            infra,
            config,
            state,
            shutdown,
        }
    }

    /// Campaign, lead, repeat. Returns only on shutdown.
    pub async fn run(&self, candidate: String) -> Result<(), ControllerError> {
        let election = Election::new(self.storage.clone(), candidate);
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let leadership = tokio::select! {
                result = election.campaign() => result?,
                _ = shutdown.changed() => return Ok(()),
            };

            self.state.leader.store(true, Ordering::Relaxed);
            self.state.metrics.leader.set(1);

            // Crash recovery: a record still running belongs to a dead
            // leader and must be cancelled before any new work starts.
            if let Err(e) = self.storage.cancel_running_records().await {
                warn!("Stale record sweep failed: {}", e);
            }

            let result = self.lead(leadership.lost.clone()).await;
            self.state.leader.store(false, Ordering::Relaxed);
            self.state.metrics.leader.set(0);
            if let Err(e) = leadership.resign().await {
                debug!("Resign after leadership end failed: {}", e);
            }
            match result {
                Ok(()) => return Ok(()),
                Err(ControllerError::Storage(StorageError::LeadershipLost)) => {
                    warn!("Leadership lost; re-entering the election");
                }
                Err(e) => {
                    // Watch/stream setup failures land here; back off a
                    // little and campaign again rather than exiting.
                    error!("Leader loop failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    /// The leader's select loop. Ends with `Ok` on shutdown and
    /// `LeadershipLost` when the lease dies.
    async fn lead(&self, mut lost: watch::Receiver<bool>) -> Result<(), ControllerError> {
        let (mut wakeup, watch_task) = self.storage.watch_spec().await?;
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tidy = tokio::time::interval(self.config.cert_tidy_interval);
        tidy.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        let result = loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_tick().await {
                        error!("Reconciliation tick failed: {}", e);
                    }
                }
                Some(()) = wakeup.recv() => {
                    debug!("Spec change observed; running an early tick");
                    if let Err(e) = self.run_tick().await {
                        error!("Reconciliation tick failed: {}", e);
                    }
                }
                _ = tidy.tick() => {
                    match self.storage.tidy_expired_certs(chrono::Utc::now()).await {
                        Ok(n) => {
                            self.state.metrics.certs_tidied_total.inc_by(n as u64);
                        }
                        Err(e) => warn!("Certificate tidy failed: {}", e),
                    }
                }
                _ = lost.changed() => {
                    if *lost.borrow() {
                        break Err(ControllerError::Storage(StorageError::LeadershipLost));
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Shutdown requested; leaving the leader loop");
                        break Ok(());
                    }
                }
            }
        };
        watch_task.abort();
        result
    }

    /// Run the scheduler and persist its outcome; returns the cluster
    /// the rest of the tick should observe, or `None` when this tick
    /// should end (conflict or nothing stored yet).
    async fn schedule(&self) -> Result<Option<Cluster>, ControllerError> {
        let Some((cluster, revision)) = self.storage.get_cluster().await? else {
            debug!("No cluster spec stored; idle tick");
            return Ok(None);
        };
        let Some((constraints, _)) = self.storage.get_constraints().await? else {
            debug!("No constraints stored; idle tick");
            return Ok(None);
        };
        constraints.validate()?;

        let machines = self.inventory.get_machines(&[]).await?;
        let now = chrono::Utc::now();

        let (next, changes) = if cluster.nodes.is_empty() {
            let (generated, changes) = scheduler::generate(
                &cluster,
                &constraints,
                &machines,
                now,
                &self.config.scheduler,
            )?;
            (generated, changes)
        } else {
            match scheduler::update(&cluster, &constraints, &machines, now, &self.config.scheduler)?
            {
                Outcome::Unchanged => return Ok(Some(cluster)),
                Outcome::Changed { cluster, changes } => (cluster, changes),
            }
        };

        for change in &changes {
            info!("Scheduler: {}", change);
        }
        match self.storage.put_cluster(&next, Some(revision)).await {
            Ok(_) => Ok(Some(next)),
            Err(StorageError::Conflict(_)) => {
                // A concurrent writer won; recompute from fresh state
                // next tick instead of clobbering it.
                warn!("Cluster spec changed concurrently; skipping this tick");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// One reconciliation tick: schedule, observe, decide, execute.
    pub async fn run_tick(&self) -> Result<(), ControllerError> {
        let Some(cluster) = self.schedule().await? else {
            return Ok(());
        };

        let status = collect_status(&cluster, &self.infra).await;
        let stored_version = self.storage.get_version().await?;
        let decision = decide_ops(&cluster, &status, stored_version, &self.infra.images);
        info!(
            "Phase {} with {} operator(s): {:?}",
            decision.phase,
            decision.ops.len(),
            decision.op_names()
        );
        self.state.set_phase(decision.phase.as_str());
        self.state.metrics.set_phase(decision.phase);

        let mut tick_outcome = match decision.phase {
            Phase::Completed => "completed",
            Phase::UpgradeAborted | Phase::EtcdBootAborted => "aborted",
            _ => "progressed",
        };
        for op in decision.ops {
            let name = op.name();
            let outcome = run_operator(op, &self.infra, &self.storage, &self.shutdown).await?;
            let label = match outcome {
                OperatorOutcome::Completed => "completed",
                OperatorOutcome::CommandFailed => "failed",
                OperatorOutcome::Cancelled => "cancelled",
            };
            self.state
                .metrics
                .operator_runs_total
                .with_label_values(&[name, label])
                .inc();
            match outcome {
                OperatorOutcome::Completed => {}
                OperatorOutcome::CommandFailed => {
                    // Not a hard error: the next tick recomputes from
                    // fresh status and may choose a different remedy.
                    tick_outcome = "command-failed";
                    break;
                }
                OperatorOutcome::Cancelled => {
                    tick_outcome = "cancelled";
                    break;
                }
            }
        }
        self.state.set_outcome(tick_outcome);
        self.state
            .metrics
            .ticks_total
            .with_label_values(&[tick_outcome])
            .inc();
        Ok(())
    }
}
