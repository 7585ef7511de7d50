//! Config-schema upgrade operator
//!
//! Runs when the stored schema version is behind the build's. The
//! decision procedure gates it on every control-plane node being
//! reachable so a half-upgraded store never coexists with unobservable
//! members.

use crate::error::ControllerError;
use crate::infra::Infra;
use crate::ops::{CommandDesc, Commander, Operator};

struct MigrateSchema;

#[async_trait::async_trait]
impl Commander for MigrateSchema {
    fn command(&self) -> CommandDesc {
        CommandDesc {
            name: "migrate-schema".to_string(),
            targets: vec![],
            detail: format!("to version {}", storage::CURRENT_VERSION),
        }
    }

    async fn run(&self, infra: &Infra) -> Result<(), ControllerError> {
        Ok(infra.version.migrate().await?)
    }
}

/// One-shot schema migration.
pub struct UpgradeOperator {
    done: bool,
}

impl UpgradeOperator {
    pub fn new() -> Self {
        Self { done: false }
    }
}

impl Default for UpgradeOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for UpgradeOperator {
    fn name(&self) -> &'static str {
        "upgrade"
    }

    fn targets(&self) -> Vec<String> {
        vec![]
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(Box::new(MigrateSchema))
    }
}
