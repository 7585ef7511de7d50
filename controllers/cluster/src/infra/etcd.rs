//! Managed etcd administration
//!
//! Talks to the etcd cluster the engine itself manages (not the
//! management store). Connections are built per call from the current
//! control-plane addresses so a changed member set never reuses a stale
//! endpoint list.

use crate::error::ControllerError;
use crate::infra::{EtcdAdminApi, EtcdHealth};
use etcd_client::{Certificate, Client, ConnectOptions, Identity, TlsOptions};
use models::EtcdMember;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// A member may trail the cluster maximum by this many raft entries and
/// still count as in sync.
const SYNC_SLACK: u64 = 8;

/// Client TLS material for the managed cluster, PEM-encoded.
#[derive(Debug, Clone)]
pub struct EtcdTls {
    pub ca: String,
    pub cert: String,
    pub key: String,
}

/// Production etcd administration client.
#[derive(Debug, Clone, Default)]
pub struct EtcdAdmin {
    tls: Option<EtcdTls>,
}

impl EtcdAdmin {
    pub fn new(tls: Option<EtcdTls>) -> Self {
        Self { tls }
    }

    fn connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(10));
        if let Some(tls) = &self.tls {
            let tls_options = TlsOptions::new()
                .ca_certificate(Certificate::from_pem(tls.ca.as_bytes()))
                .identity(Identity::from_pem(tls.cert.as_bytes(), tls.key.as_bytes()));
            options = options.with_tls(tls_options);
        }
        options
    }

    fn scheme(&self) -> &'static str {
        if self.tls.is_some() { "https" } else { "http" }
    }

    fn client_urls(&self, addrs: &[String]) -> Vec<String> {
        addrs
            .iter()
            .map(|a| format!("{}://{}:2379", self.scheme(), a))
            .collect()
    }

    async fn connect(&self, addrs: &[String]) -> Result<Client, ControllerError> {
        let urls = self.client_urls(addrs);
        Ok(Client::connect(urls, Some(self.connect_options())).await?)
    }
}

/// Host part of a peer URL like `https://10.0.0.1:2380`.
pub(crate) fn peer_url_host(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host = rest.split(':').next()?;
    if host.is_empty() { None } else { Some(host.to_string()) }
}

#[async_trait::async_trait]
impl EtcdAdminApi for EtcdAdmin {
    async fn member_list(
        &self,
        endpoints: &[String],
    ) -> Result<HashMap<String, EtcdMember>, ControllerError> {
        let mut client = self.connect(endpoints).await?;
        let resp = client.member_list().await?;
        let mut members = HashMap::new();
        for m in resp.members() {
            let Some(addr) = m.peer_urls().iter().find_map(|u| peer_url_host(u)) else {
                warn!("etcd member {} has no parseable peer URL", m.id());
                continue;
            };
            members.insert(
                addr,
                EtcdMember {
                    id: m.id(),
                    name: m.name().to_string(),
                    peer_urls: m.peer_urls().to_vec(),
                },
            );
        }
        Ok(members)
    }

    async fn add_member(&self, endpoints: &[String], peer_url: &str) -> Result<(), ControllerError> {
        let mut client = self.connect(endpoints).await?;
        client.member_add(vec![peer_url.to_string()], None).await?;
        Ok(())
    }

    async fn remove_member(&self, endpoints: &[String], id: u64) -> Result<(), ControllerError> {
        let mut client = self.connect(endpoints).await?;
        client.member_remove(id).await?;
        Ok(())
    }

    async fn cluster_health(&self, endpoints: &[String]) -> Result<EtcdHealth, ControllerError> {
        // Probe every member individually; an unreachable member must not
        // hide the health of the rest.
        let mut indices: HashMap<String, u64> = HashMap::new();
        for addr in endpoints {
            match self.connect(std::slice::from_ref(addr)).await {
                Ok(mut client) => match client.status().await {
                    Ok(status) => {
                        indices.insert(addr.clone(), status.raft_index());
                    }
                    Err(e) => debug!("etcd status probe failed for {}: {}", addr, e),
                },
                Err(e) => debug!("etcd connect failed for {}: {}", addr, e),
            }
        }

        let max_index = indices.values().copied().max().unwrap_or(0);
        let mut in_sync = HashMap::new();
        for addr in endpoints {
            let synced = indices
                .get(addr)
                .map(|i| max_index.saturating_sub(*i) <= SYNC_SLACK)
                .unwrap_or(false);
            in_sync.insert(addr.clone(), synced);
        }
        let healthy = !endpoints.is_empty() && indices.len() > endpoints.len() / 2;
        Ok(EtcdHealth { healthy, in_sync })
    }
}
