//! Leader election
//!
//! Lease-backed election on the management etcd. Exactly one controller
//! replica holds the leadership key; the rest block in `campaign` until
//! the holder resigns or its lease expires. Loss of the lease is
//! surfaced through the `lost` watch channel so the run loop can fall
//! back into the campaign instead of exiting.

use crate::error::StorageError;
use crate::store::Storage;
use crate::KEY_ELECTION;
use etcd_client::{LeaderKey, ResignOptions};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Seconds before an unrefreshed leadership lease expires.
const LEASE_TTL: i64 = 30;

/// Leader election handle.
#[derive(Debug, Clone)]
pub struct Election {
    storage: Storage,
    candidate: String,
}

/// Held leadership: dropped or resigned to give it up. `lost` flips to
/// true when the lease can no longer be refreshed.
pub struct Leadership {
    pub lost: watch::Receiver<bool>,
    leader_key: LeaderKey,
    lease_id: i64,
    storage: Storage,
    keep_alive: JoinHandle<()>,
}

impl std::fmt::Debug for Leadership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leadership")
            .field("lease_id", &self.lease_id)
            .finish_non_exhaustive()
    }
}

impl Election {
    pub fn new(storage: Storage, candidate: impl Into<String>) -> Self {
        Self {
            storage,
            candidate: candidate.into(),
        }
    }

    /// Block until this replica becomes the leader.
    pub async fn campaign(&self) -> Result<Leadership, StorageError> {
        let mut client = self.storage.client.clone();
        let lease = client.lease_grant(LEASE_TTL, None).await?;
        let lease_id = lease.id();
        info!(
            "Campaigning for leadership as {} (lease {})",
            self.candidate, lease_id
        );

        let resp = client
            .campaign(KEY_ELECTION, self.candidate.as_str(), lease_id)
            .await?;
        let leader_key = resp
            .leader()
            .cloned()
            .ok_or(StorageError::LeadershipLost)?;
        info!("Acquired leadership as {}", self.candidate);

        let (lost_tx, lost_rx) = watch::channel(false);
        let keep_alive = {
            let mut client = self.storage.client.clone();
            tokio::spawn(async move {
                let (mut keeper, mut stream) = match client.lease_keep_alive(lease_id).await {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("Failed to start lease keep-alive: {}", e);
                        let _ = lost_tx.send(true);
                        return;
                    }
                };
                let interval = Duration::from_secs((LEASE_TTL as u64) / 3);
                loop {
                    tokio::time::sleep(interval).await;
                    if let Err(e) = keeper.keep_alive().await {
                        warn!("Lease keep-alive send failed: {}", e);
                        let _ = lost_tx.send(true);
                        return;
                    }
                    match stream.message().await {
                        Ok(Some(resp)) if resp.ttl() > 0 => {}
                        Ok(_) => {
                            warn!("Leadership lease expired");
                            let _ = lost_tx.send(true);
                            return;
                        }
                        Err(e) => {
                            warn!("Lease keep-alive stream failed: {}", e);
                            let _ = lost_tx.send(true);
                            return;
                        }
                    }
                }
            })
        };

        Ok(Leadership {
            lost: lost_rx,
            leader_key,
            lease_id,
            storage: self.storage.clone(),
            keep_alive,
        })
    }
}

impl Leadership {
    /// Whether the lease is still believed valid.
    pub fn is_held(&self) -> bool {
        !*self.lost.borrow()
    }

    /// Give up leadership cleanly, releasing the election key and lease.
    pub async fn resign(self) -> Result<(), StorageError> {
        self.keep_alive.abort();
        let mut client = self.storage.client.clone();
        let options = ResignOptions::new().with_leader(self.leader_key.clone());
        if let Err(e) = client.resign(Some(options)).await {
            warn!("Resign failed (lease revoke will supersede): {}", e);
        }
        client.lease_revoke(self.lease_id).await?;
        info!("Resigned leadership");
        Ok(())
    }
}

impl Drop for Leadership {
    fn drop(&mut self) {
        self.keep_alive.abort();
    }
}
