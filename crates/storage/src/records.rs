//! Audit records
//!
//! One Record per operation run, persisted before the first command and
//! updated after every command. `cancel_running_records` is the
//! crash-recovery sweep: on leadership acquisition, any record still
//! marked running belonged to a dead leader and is cancelled before new
//! work starts.

use crate::error::StorageError;
use crate::store::Storage;
use crate::{KEY_LAST_RECORD_ID, KEY_RECORDS_PREFIX, record_key};
use etcd_client::{Compare, CompareOp, GetOptions, Txn, TxnOp};
use models::{Record, RecordStatus};
use tracing::{info, warn};

/// Where the execution engine writes operation progress. `Storage`
/// implements this against etcd; tests use [`MemoryRecordSink`].
///
/// [`MemoryRecordSink`]: crate::records::MemoryRecordSink
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Allocate an id and persist a fresh running record.
    async fn begin(&self, operation: &str, targets: Vec<String>)
    -> Result<Record, StorageError>;

    /// Persist the record's current state.
    async fn update(&self, record: &Record) -> Result<(), StorageError>;
}

impl Storage {
    /// Allocate the next record id with a bounded compare-and-swap loop
    /// on the counter key.
    async fn next_record_id(&self) -> Result<u64, StorageError> {
        for _ in 0..16 {
            let mut client = self.client.clone();
            let resp = client.get(KEY_LAST_RECORD_ID, None).await?;
            let (current, compare) = match resp.kvs().first() {
                Some(kv) => {
                    let id: u64 = serde_json::from_slice(kv.value())?;
                    (
                        id,
                        Compare::mod_revision(KEY_LAST_RECORD_ID, CompareOp::Equal, kv.mod_revision()),
                    )
                }
                None => (0, Compare::version(KEY_LAST_RECORD_ID, CompareOp::Equal, 0)),
            };
            let next = current + 1;
            let txn = Txn::new().when(vec![compare]).and_then(vec![TxnOp::put(
                KEY_LAST_RECORD_ID,
                serde_json::to_vec(&next)?,
                None,
            )]);
            if client.txn(txn).await?.succeeded() {
                return Ok(next);
            }
        }
        Err(StorageError::Conflict(KEY_LAST_RECORD_ID.to_string()))
    }

    pub async fn get_record(&self, id: u64) -> Result<Record, StorageError> {
        let mut client = self.client.clone();
        let resp = client.get(record_key(id), None).await?;
        match resp.kvs().first() {
            Some(kv) => Ok(serde_json::from_slice(kv.value())?),
            None => Err(StorageError::NotFound(format!("record {}", id))),
        }
    }

    /// The most recent records, newest first, at most `limit`.
    pub async fn list_records(&self, limit: i64) -> Result<Vec<Record>, StorageError> {
        let mut client = self.client.clone();
        let options = GetOptions::new()
            .with_prefix()
            .with_sort(etcd_client::SortTarget::Key, etcd_client::SortOrder::Descend)
            .with_limit(limit);
        let resp = client.get(KEY_RECORDS_PREFIX, Some(options)).await?;
        resp.kvs()
            .iter()
            .map(|kv| serde_json::from_slice(kv.value()).map_err(StorageError::from))
            .collect()
    }

    /// Cancel every record still marked running. Returns how many were
    /// swept.
    pub async fn cancel_running_records(&self) -> Result<usize, StorageError> {
        let mut client = self.client.clone();
        let resp = client
            .get(KEY_RECORDS_PREFIX, Some(GetOptions::new().with_prefix()))
            .await?;
        let mut cancelled = 0;
        for kv in resp.kvs() {
            let mut record: Record = serde_json::from_slice(kv.value())?;
            if record.status == RecordStatus::Running {
                warn!(
                    "Cancelling record {} ({}) left running by a previous leader",
                    record.id, record.operation
                );
                record.cancel(chrono::Utc::now());
                client
                    .put(record_key(record.id), serde_json::to_vec(&record)?, None)
                    .await?;
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!("Cancelled {} stale running record(s)", cancelled);
        }
        Ok(cancelled)
    }
}

#[async_trait::async_trait]
impl RecordSink for Storage {
    async fn begin(&self, operation: &str, targets: Vec<String>) -> Result<Record, StorageError> {
        let id = self.next_record_id().await?;
        let record = Record::new(id, operation, targets, chrono::Utc::now());
        self.update(&record).await?;
        Ok(record)
    }

    async fn update(&self, record: &Record) -> Result<(), StorageError> {
        let mut client = self.client.clone();
        client
            .put(record_key(record.id), serde_json::to_vec(record)?, None)
            .await?;
        Ok(())
    }
}

/// In-memory record sink for unit tests.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default, Clone)]
pub struct MemoryRecordSink {
    inner: std::sync::Arc<std::sync::Mutex<Vec<Record>>>,
}

#[cfg(any(test, feature = "test-util"))]
impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, in creation order.
    pub fn records(&self) -> Vec<Record> {
        self.inner.lock().unwrap().clone()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait::async_trait]
impl RecordSink for MemoryRecordSink {
    async fn begin(&self, operation: &str, targets: Vec<String>) -> Result<Record, StorageError> {
        let mut records = self.inner.lock().unwrap();
        let id = records.len() as u64 + 1;
        let record = Record::new(id, operation, targets, chrono::Utc::now());
        records.push(record.clone());
        Ok(record)
    }

    async fn update(&self, record: &Record) -> Result<(), StorageError> {
        let mut records = self.inner.lock().unwrap();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("record {}", record.id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_allocates_sequential_ids() {
        let sink = MemoryRecordSink::new();
        let a = sink.begin("op-a", vec!["10.0.0.1".into()]).await.unwrap();
        let b = sink.begin("op-b", vec![]).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(sink.records().len(), 2);
    }

    #[tokio::test]
    async fn memory_sink_update_replaces_by_id() {
        let sink = MemoryRecordSink::new();
        let mut r = sink.begin("op", vec![]).await.unwrap();
        r.set_command("step one".into());
        sink.update(&r).await.unwrap();
        assert_eq!(sink.records()[0].command, "step one");
    }
}
