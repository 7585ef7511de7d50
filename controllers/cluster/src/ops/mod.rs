//! Operator/Commander execution engine
//!
//! An Operator is a named, single-use sequence of Commanders; a Commander
//! is one idempotent unit of remote work. The engine persists a Record
//! before the first commander and after every commander, so a crash mid
//! operation is attributable and the stale record is cancelled on the
//! next leadership acquisition.
//!
//! A commander failure ends the operator and the tick without escalating:
//! the next tick recomputes desired operations from fresh status.

pub mod backup;
pub mod common;
pub mod decommission;
pub mod etcd;
pub mod resource;
pub mod service;
pub mod upgrade;

use crate::error::ControllerError;
use crate::infra::Infra;
use storage::RecordSink;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Human-readable description of one command, recorded for audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDesc {
    pub name: String,
    pub targets: Vec<String>,
    pub detail: String,
}

impl std::fmt::Display for CommandDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.name, self.targets.join(","))?;
        if !self.detail.is_empty() {
            write!(f, " {}", self.detail)?;
        }
        Ok(())
    }
}

/// One idempotent unit of remote work.
#[async_trait::async_trait]
pub trait Commander: Send + Sync {
    fn command(&self) -> CommandDesc;

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError>;
}

/// A named, stateful, single-use step sequence. `next_command` returns
/// the next commander or `None` when exhausted; operators are never
/// retried as a whole.
pub trait Operator: Send {
    fn name(&self) -> &'static str;

    /// Addresses of the nodes this operator touches, for the record.
    fn targets(&self) -> Vec<String>;

    fn next_command(&mut self) -> Option<Box<dyn Commander>>;
}

/// How one operator run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorOutcome {
    Completed,
    /// A commander failed; recorded, tick ends, not a hard error
    CommandFailed,
    /// Cancellation observed between commanders
    Cancelled,
}

/// Run one operator to completion, failure or cancellation, keeping its
/// audit record current after every commander.
pub async fn run_operator(
    mut op: Box<dyn Operator>,
    infra: &Infra,
    sink: &dyn RecordSink,
    cancel: &watch::Receiver<bool>,
) -> Result<OperatorOutcome, ControllerError> {
    let mut record = sink.begin(op.name(), op.targets()).await?;
    info!("Running operator {} (record {})", op.name(), record.id);

    loop {
        // Cancellation is honored between commanders only; a commander
        // already running finishes or fails first.
        if *cancel.borrow() {
            record.cancel(chrono::Utc::now());
            sink.update(&record).await?;
            info!("Operator {} cancelled", op.name());
            return Ok(OperatorOutcome::Cancelled);
        }

        let Some(commander) = op.next_command() else {
            record.complete(chrono::Utc::now());
            sink.update(&record).await?;
            info!("Operator {} completed", op.name());
            return Ok(OperatorOutcome::Completed);
        };

        let desc = commander.command();
        record.set_command(desc.to_string());
        sink.update(&record).await?;

        match commander.run(infra).await {
            Ok(()) => {}
            Err(e) => {
                error!("Command {} failed: {}", desc, e);
                record.fail(e.to_string(), chrono::Utc::now());
                sink.update(&record).await?;
                warn!(
                    "Operator {} stopped after command failure; will recompute next tick",
                    op.name()
                );
                return Ok(OperatorOutcome::CommandFailed);
            }
        }
    }
}

#[cfg(test)]
mod engine_test;
