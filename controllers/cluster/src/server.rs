//! Probe and metrics endpoint
//!
//! A small axum listener exposing `/health` for liveness probes,
//! `/status` with the current phase and leadership as JSON, `/records`
//! with the recent audit records, and `/metrics` in Prometheus text
//! format.

use crate::metrics::Metrics;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use storage::{Storage, StorageError};
use tracing::info;

/// State shared between the controller loop and the HTTP handlers.
#[derive(Debug)]
pub struct ServerState {
    pub leader: AtomicBool,
    pub phase: RwLock<String>,
    pub last_outcome: RwLock<String>,
    pub metrics: Metrics,
    storage: Storage,
}

impl ServerState {
    pub fn new(metrics: Metrics, storage: Storage) -> Self {
        Self {
            leader: AtomicBool::new(false),
            phase: RwLock::new("unknown".to_string()),
            last_outcome: RwLock::new("none".to_string()),
            metrics,
            storage,
        }
    }

    pub fn set_phase(&self, phase: &str) {
        if let Ok(mut p) = self.phase.write() {
            *p = phase.to_string();
        }
    }

    pub fn set_outcome(&self, outcome: &str) {
        if let Ok(mut o) = self.last_outcome.write() {
            *o = outcome.to_string();
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<Arc<ServerState>>) -> Json<serde_json::Value> {
    let phase = state
        .phase
        .read()
        .map(|p| p.clone())
        .unwrap_or_else(|_| "unknown".to_string());
    let outcome = state
        .last_outcome
        .read()
        .map(|o| o.clone())
        .unwrap_or_else(|_| "unknown".to_string());
    Json(serde_json::json!({
        "leader": state.leader.load(Ordering::Relaxed),
        "phase": phase,
        "lastOutcome": outcome,
    }))
}

async fn records(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<models::Record>>, StatusCode> {
    state
        .storage
        .list_records(20)
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn record(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<u64>,
) -> Result<Json<models::Record>, StatusCode> {
    match state.storage.get_record(id).await {
        Ok(record) => Ok(Json(record)),
        Err(StorageError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn metrics(State(state): State<Arc<ServerState>>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.metrics.registry.gather(), &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serve until the process exits.
pub async fn serve(addr: SocketAddr, state: Arc<ServerState>) -> std::io::Result<()> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/records", get(records))
        .route("/records/{id}", get(record))
        .route("/metrics", get(metrics))
        .with_state(state);
    info!("Probe endpoint listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
