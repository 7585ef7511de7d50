//! metalops cluster controller
//!
//! Bootstraps and continuously reconciles a distributed etcd store and
//! Kubernetes control plane across a pool of physical machines:
//! - schedules machines into control-plane/worker roles under
//!   replication and rack-diversity constraints
//! - compares desired topology against observed status and drives the
//!   cluster toward it through idempotent, crash-resumable operations
//!
//! Exactly one replica leads at a time, elected through the management
//! etcd; the rest stand by in the election.

mod components;
mod controller;
mod decide;
mod error;
mod filter;
mod infra;
mod metrics;
mod ops;
mod scheduler;
mod server;
mod status;

#[cfg(test)]
mod decide_test;
#[cfg(test)]
mod test_utils;

use crate::controller::{Controller, ControllerConfig};
use crate::infra::Infra;
use crate::infra::etcd::{EtcdAdmin, EtcdTls};
use crate::infra::kube::KubeClient;
use crate::metrics::Metrics;
use crate::server::ServerState;
use agent_client::AgentClient;
use anyhow::Context;
use components::ImageCatalog;
use inventory_client::InventoryClient;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use storage::Storage;
use tracing::{error, info};

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn etcd_tls_from_env() -> anyhow::Result<Option<EtcdTls>> {
    let ca = env::var("METALOPS_ETCD_TLS_CA").ok();
    let cert = env::var("METALOPS_ETCD_TLS_CERT").ok();
    let key = env::var("METALOPS_ETCD_TLS_KEY").ok();
    match (ca, cert, key) {
        (Some(ca), Some(cert), Some(key)) => Ok(Some(EtcdTls {
            ca: std::fs::read_to_string(&ca).with_context(|| format!("reading {}", ca))?,
            cert: std::fs::read_to_string(&cert).with_context(|| format!("reading {}", cert))?,
            key: std::fs::read_to_string(&key).with_context(|| format!("reading {}", key))?,
        })),
        (None, None, None) => Ok(None),
        _ => anyhow::bail!(
            "METALOPS_ETCD_TLS_CA/CERT/KEY must be set together or not at all"
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Pin the rustls provider before any TLS client is built
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting metalops cluster controller");

    // Load configuration from environment variables
    let etcd_endpoints: Vec<String> = env_or("METALOPS_ETCD_ENDPOINTS", "http://127.0.0.1:2379")
        .split(',')
        .map(str::to_string)
        .collect();
    let inventory_url = env_or("INVENTORY_URL", "http://inventory:10080");
    let inventory_token = env::var("INVENTORY_TOKEN")
        .context("INVENTORY_TOKEN environment variable is required")?;
    let agent_port: u16 = env_or("METALOPS_AGENT_PORT", "9105")
        .parse()
        .context("METALOPS_AGENT_PORT must be a port number")?;
    let listen_addr = env_or("METALOPS_LISTEN_ADDR", "0.0.0.0:10280")
        .parse()
        .context("METALOPS_LISTEN_ADDR must be host:port")?;
    let tick_interval: u64 = env_or("METALOPS_TICK_INTERVAL_SECS", "60")
        .parse()
        .context("METALOPS_TICK_INTERVAL_SECS must be seconds")?;

    info!("Configuration:");
    info!("  Management etcd: {:?}", etcd_endpoints);
    info!("  Inventory URL: {}", inventory_url);
    info!("  Agent port: {}", agent_port);

    let storage = Storage::connect(&etcd_endpoints).await?;

    let inventory = InventoryClient::new(inventory_url.clone(), inventory_token)?;
    inventory.validate_token().await.map_err(|e| {
        error!("Failed to validate inventory token: {}", e);
        error!("Please ensure INVENTORY_TOKEN is valid and {} is reachable", inventory_url);
        e
    })?;
    info!("Inventory token validated and connectivity established");

    let infra = Infra {
        agent: Arc::new(AgentClient::new(agent_port)?),
        etcd: Arc::new(EtcdAdmin::new(etcd_tls_from_env()?)),
        kube: Arc::new(KubeClient::new()),
        version: Arc::new(storage.clone()),
        images: ImageCatalog::default(),
    };

    let metrics = Metrics::new()?;
    let state = Arc::new(ServerState::new(metrics, storage.clone()));
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = server::serve(listen_addr, state).await {
                error!("Probe endpoint failed: {}", e);
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let config = ControllerConfig {
        tick_interval: Duration::from_secs(tick_interval),
        ..Default::default()
    };
    let candidate = format!(
        "{}-{}",
        hostname(),
        uuid::Uuid::new_v4().simple()
    );
    let controller = Controller::new(
        storage,
        Arc::new(inventory),
        infra,
        config,
        state,
        shutdown_rx,
    );
    controller.run(candidate).await?;

    info!("Controller stopped");
    Ok(())
}

fn hostname() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| "metalops".to_string())
}
