//! Certificate inventory
//!
//! Certificates issued for cluster components are recorded here as
//! opaque PEM plus expiry metadata (the issuer itself is an external
//! service). The controller's low-frequency timer calls
//! `tidy_expired_certs` to sweep entries whose lifetime has passed.

use crate::error::StorageError;
use crate::store::Storage;
use crate::KEY_CERTS_PREFIX;
use chrono::{DateTime, Utc};
use etcd_client::GetOptions;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One issued certificate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertEntry {
    /// Certificate serial, the inventory key
    pub serial: String,
    /// Subject common name, for audit
    pub common_name: String,
    pub not_after: DateTime<Utc>,
    pub pem: String,
}

impl CertEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }
}

impl Storage {
    fn cert_key(serial: &str) -> String {
        format!("{}{}", KEY_CERTS_PREFIX, serial)
    }

    pub async fn put_cert(&self, entry: &CertEntry) -> Result<(), StorageError> {
        let mut client = self.client.clone();
        client
            .put(Self::cert_key(&entry.serial), serde_json::to_vec(entry)?, None)
            .await?;
        Ok(())
    }

    pub async fn list_certs(&self) -> Result<Vec<CertEntry>, StorageError> {
        let mut client = self.client.clone();
        let resp = client
            .get(KEY_CERTS_PREFIX, Some(GetOptions::new().with_prefix()))
            .await?;
        resp.kvs()
            .iter()
            .map(|kv| serde_json::from_slice(kv.value()).map_err(StorageError::from))
            .collect()
    }

    /// Delete every certificate whose lifetime has passed. Returns the
    /// number removed.
    pub async fn tidy_expired_certs(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0;
        for entry in self.list_certs().await? {
            if entry.is_expired(now) {
                let mut client = self.client.clone();
                client.delete(Self::cert_key(&entry.serial), None).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Tidied {} expired certificate(s)", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let entry = CertEntry {
            serial: "01".into(),
            common_name: "etcd peer".into(),
            not_after: now,
            pem: String::new(),
        };
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - chrono::Duration::seconds(1)));
    }
}
