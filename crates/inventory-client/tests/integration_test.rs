//! Integration tests for the inventory client
//!
//! These tests require a running inventory service.
//! Set INVENTORY_URL and INVENTORY_TOKEN environment variables to run.

use inventory_client::{InventoryApi, InventoryClient};

fn client_from_env() -> InventoryClient {
    let url = std::env::var("INVENTORY_URL")
        .unwrap_or_else(|_| "http://localhost:10080".to_string());
    let token =
        std::env::var("INVENTORY_TOKEN").expect("INVENTORY_TOKEN environment variable must be set");
    InventoryClient::new(url, token).expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires running inventory service
async fn test_client_creation() {
    let client = client_from_env();
    client.validate_token().await.expect("token validation failed");
}

#[tokio::test]
#[ignore]
async fn test_query_all_machines() {
    let client = client_from_env();
    let machines = client.get_machines(&[]).await.expect("query failed");
    println!("Found {} machines", machines.len());
}

#[tokio::test]
#[ignore]
async fn test_query_healthy_machines() {
    let client = client_from_env();
    let machines = client
        .get_machines(&[("state", "healthy")])
        .await
        .expect("query failed");
    for m in &machines {
        assert!(m.status.state.is_healthy());
    }
}
