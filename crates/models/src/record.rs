//! Audit records
//!
//! A Record is the persisted progress trail for one operation run. It is
//! created before the first command executes and updated after every
//! command, which makes it the crash-recovery anchor: a record still
//! marked running on controller start-up belongs to a dead leader and is
//! cancelled before new work begins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal and non-terminal states of a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// The persisted audit entry for one operation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: u64,
    pub status: RecordStatus,
    /// Operation name, e.g. "etcd-add-member"
    pub operation: String,
    /// Addresses of the nodes the operation targets
    pub targets: Vec<String>,
    /// Human-readable description of the currently-executing command
    #[serde(default)]
    pub command: String,
    /// Every command this run has reached, in order
    #[serde(default)]
    pub trace: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(id: u64, operation: &str, targets: Vec<String>, now: DateTime<Utc>) -> Record {
        Record {
            id,
            status: RecordStatus::Running,
            operation: operation.to_string(),
            targets,
            command: String::new(),
            trace: vec![],
            error: None,
            started_at: now,
            finished_at: None,
        }
    }

    /// Note the command about to run. Persisted before execution so a
    /// crash mid-command is attributable.
    pub fn set_command(&mut self, description: String) {
        self.trace.push(description.clone());
        self.command = description;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = RecordStatus::Completed;
        self.finished_at = Some(now);
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = RecordStatus::Cancelled;
        self.finished_at = Some(now);
    }

    pub fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.status = RecordStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(now);
    }

    pub fn is_running(&self) -> bool {
        self.status == RecordStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn lifecycle_transitions() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(30);
        let mut r = Record::new(7, "etcd-boot", vec!["10.0.0.1".into()], t0);
        assert!(r.is_running());
        r.set_command("pull image etcd".into());
        r.fail("connection refused".into(), t1);
        assert_eq!(r.status, RecordStatus::Failed);
        assert_eq!(r.error.as_deref(), Some("connection refused"));
        assert_eq!(r.finished_at, Some(t1));
        assert_eq!(r.command, "pull image etcd");
    }
}
