//! The etcd-backed spec store
//!
//! Holds the desired Cluster and Constraints, the config-schema version
//! and the spec watch used to wake the reconciliation loop. All writes
//! to the spec go through compare-and-swap on the etcd mod revision.

use crate::error::StorageError;
use crate::{KEY_CLUSTER, KEY_CONSTRAINTS, KEY_VERSION};
use etcd_client::{Client, Compare, CompareOp, ConnectOptions, Txn, TxnOp};
use models::{Cluster, Constraints};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Version of the on-disk configuration schema this build writes.
pub const CURRENT_VERSION: u32 = 2;

/// Handle to the management etcd cluster.
#[derive(Clone)]
pub struct Storage {
    pub(crate) client: Client,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Connect to the management etcd cluster.
    pub async fn connect(endpoints: &[String]) -> Result<Self, StorageError> {
        let options = ConnectOptions::new()
            .with_keep_alive(Duration::from_secs(10), Duration::from_secs(5))
            .with_connect_timeout(Duration::from_secs(10));
        let client = Client::connect(endpoints, Some(options)).await?;
        info!("Connected to management etcd at {:?}", endpoints);
        Ok(Self { client })
    }

    async fn get_versioned<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<(T, i64)>, StorageError> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;
        match resp.kvs().first() {
            Some(kv) => {
                let value: T = serde_json::from_slice(kv.value())?;
                Ok(Some((value, kv.mod_revision())))
            }
            None => Ok(None),
        }
    }

    /// Compare-and-swap put: `expected` is the mod revision the caller
    /// read, or `None` to require that the key does not exist yet.
    async fn put_versioned<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expected: Option<i64>,
    ) -> Result<i64, StorageError> {
        let mut client = self.client.clone();
        let bytes = serde_json::to_vec(value)?;
        let compare = match expected {
            Some(rev) => Compare::mod_revision(key, CompareOp::Equal, rev),
            // version == 0 means the key has never been created
            None => Compare::version(key, CompareOp::Equal, 0),
        };
        let txn = Txn::new()
            .when(vec![compare])
            .and_then(vec![TxnOp::put(key, bytes, None)]);
        let resp = client.txn(txn).await?;
        if !resp.succeeded() {
            return Err(StorageError::Conflict(key.to_string()));
        }
        // The put revision is the txn header revision
        Ok(resp.header().map(|h| h.revision()).unwrap_or(0))
    }

    /// The current desired cluster and its revision, if one is stored.
    pub async fn get_cluster(&self) -> Result<Option<(Cluster, i64)>, StorageError> {
        self.get_versioned(KEY_CLUSTER).await
    }

    /// Replace the desired cluster. `expected` must be the revision
    /// returned by the get that produced this update (None for initial
    /// creation); a concurrent writer makes this fail with `Conflict`.
    pub async fn put_cluster(
        &self,
        cluster: &Cluster,
        expected: Option<i64>,
    ) -> Result<i64, StorageError> {
        let rev = self.put_versioned(KEY_CLUSTER, cluster, expected).await?;
        debug!("Stored cluster {} at revision {}", cluster.name, rev);
        Ok(rev)
    }

    /// The stored constraints and their revision, if any.
    pub async fn get_constraints(&self) -> Result<Option<(Constraints, i64)>, StorageError> {
        self.get_versioned(KEY_CONSTRAINTS).await
    }

    /// Replace the constraints, compare-and-swap like [`put_cluster`].
    ///
    /// [`put_cluster`]: Storage::put_cluster
    pub async fn put_constraints(
        &self,
        constraints: &Constraints,
        expected: Option<i64>,
    ) -> Result<i64, StorageError> {
        self.put_versioned(KEY_CONSTRAINTS, constraints, expected)
            .await
    }

    /// The stored config-schema version; 0 when the store is fresh.
    pub async fn get_version(&self) -> Result<u32, StorageError> {
        let mut client = self.client.clone();
        let resp = client.get(KEY_VERSION, None).await?;
        match resp.kvs().first() {
            Some(kv) => Ok(serde_json::from_slice(kv.value())?),
            None => Ok(0),
        }
    }

    pub async fn put_version(&self, version: u32) -> Result<(), StorageError> {
        let mut client = self.client.clone();
        client
            .put(KEY_VERSION, serde_json::to_vec(&version)?, None)
            .await?;
        Ok(())
    }

    /// Bring the stored schema up to [`CURRENT_VERSION`], one step at a
    /// time, persisting the version after each step so a crash resumes
    /// where it left off.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        let mut version = self.get_version().await?;
        while version < CURRENT_VERSION {
            match version {
                // Fresh store: nothing to rewrite
                0 => {}
                1 => self.migrate_to_2().await?,
                v => {
                    warn!("No migration registered for schema version {}", v);
                }
            }
            version += 1;
            self.put_version(version).await?;
            info!("Migrated config schema to version {}", version);
        }
        Ok(())
    }

    /// v1 stored the cluster document before per-component overrides and
    /// backup options existed. Re-serializing through the current schema
    /// fills in the defaults.
    async fn migrate_to_2(&self) -> Result<(), StorageError> {
        if let Some((cluster, rev)) = self.get_cluster().await? {
            match self.put_cluster(&cluster, Some(rev)).await {
                Ok(_) | Err(StorageError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Watch the cluster and constraints keys; every change sends a unit
    /// wake-up. The watch task runs until the returned handle is dropped
    /// or aborted.
    pub async fn watch_spec(&self) -> Result<(mpsc::Receiver<()>, JoinHandle<()>), StorageError> {
        let (tx, rx) = mpsc::channel(1);
        let mut client = self.client.clone();
        let (_cluster_watcher, mut cluster_stream) = client.watch(KEY_CLUSTER, None).await?;
        let (_constraints_watcher, mut constraints_stream) =
            client.watch(KEY_CONSTRAINTS, None).await?;

        let handle = tokio::spawn(async move {
            // Keep the watchers alive for the lifetime of the task
            let _cluster_watcher = _cluster_watcher;
            let _constraints_watcher = _constraints_watcher;
            loop {
                let message = tokio::select! {
                    m = cluster_stream.message() => m,
                    m = constraints_stream.message() => m,
                };
                match message {
                    Ok(Some(resp)) => {
                        if !resp.events().is_empty() {
                            // A full channel means a wake-up is already pending
                            let _ = tx.try_send(());
                        }
                    }
                    Ok(None) => {
                        debug!("Spec watch stream closed");
                        break;
                    }
                    Err(e) => {
                        error!("Spec watch failed: {}", e);
                        break;
                    }
                }
            }
        });
        Ok((rx, handle))
    }
}
