//! Inventory API client
//!
//! Implements the machine-inventory REST API client. The service exposes
//! a machine search endpoint at /api/v1/machines taking repeated filter
//! query parameters.

use crate::error::InventoryError;
use crate::inventory_trait::InventoryApi;
use models::Machine;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// A page of machines from the search endpoint.
#[derive(Debug, Deserialize)]
struct MachinePage {
    results: Vec<Machine>,
    #[serde(default)]
    next: Option<String>,
}

/// Inventory API client
pub struct InventoryClient {
    client: Client,
    base_url: String,
    token: String,
}

impl InventoryClient {
    /// Create a new inventory client
    ///
    /// # Arguments
    /// * `base_url` - Inventory base URL (e.g., "http://inventory:10080")
    /// * `token` - API token for authentication
    pub fn new(base_url: String, token: String) -> Result<Self, InventoryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(InventoryError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Validate the API token by making a lightweight authenticated request.
    pub async fn validate_token(&self) -> Result<(), InventoryError> {
        let url = format!("{}/api/v1/status", self.base_url);
        debug!("Validating inventory token and connectivity");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(InventoryError::Http)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == 401 || status == 403 {
            return Err(InventoryError::Authentication(format!(
                "invalid token: {} - {}",
                status, body
            )));
        }
        if !status.is_success() {
            return Err(InventoryError::Api(format!(
                "failed to validate token: {} - {}",
                status, body
            )));
        }
        Ok(())
    }

    /// Fetch all pages of a paginated machine search.
    async fn fetch_all_pages(&self, mut url: String) -> Result<Vec<Machine>, InventoryError> {
        let mut all_results = Vec::new();

        loop {
            debug!("Fetching page: {}", url);

            let response = self
                .client
                .get(&url)
                .header("Authorization", format!("Bearer {}", self.token))
                .header("Accept", "application/json")
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(InventoryError::NotFound(body));
                }
                return Err(InventoryError::Api(format!(
                    "failed to fetch page: {} - {}",
                    status, body
                )));
            }

            let response_text = response.text().await?;
            let page: MachinePage = serde_json::from_str(&response_text).map_err(|e| {
                InventoryError::Api(format!(
                    "error decoding response body: {} - Response (first 500 chars): {}",
                    e,
                    response_text.chars().take(500).collect::<String>()
                ))
            })?;
            all_results.extend(page.results);

            match page.next {
                Some(next_url) => {
                    url = if next_url.starts_with("http") {
                        next_url
                    } else {
                        format!("{}{}", self.base_url, next_url)
                    };
                }
                None => break,
            }
        }

        Ok(all_results)
    }

    fn machines_url(&self, filters: &[(&str, &str)]) -> String {
        let mut url = format!("{}/api/v1/machines", self.base_url);
        if !filters.is_empty() {
            let query: Vec<String> = filters
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

#[async_trait::async_trait]
impl InventoryApi for InventoryClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_machines(&self, filters: &[(&str, &str)]) -> Result<Vec<Machine>, InventoryError> {
        self.fetch_all_pages(self.machines_url(filters)).await
    }

    async fn get_machine(&self, serial: &str) -> Result<Machine, InventoryError> {
        let url = format!(
            "{}/api/v1/machines/{}",
            self.base_url,
            urlencoding::encode(serial)
        );
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(InventoryError::NotFound(format!("machine {}", serial)));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(InventoryError::Api(format!(
                "failed to get machine {}: {} - {}",
                serial, status, body
            )));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machines_url_encodes_filters() {
        let client =
            InventoryClient::new("http://inv:10080/".into(), "t".into()).unwrap();
        assert_eq!(client.base_url(), "http://inv:10080");
        let url = client.machines_url(&[("state", "healthy"), ("label", "env=prod")]);
        assert_eq!(
            url,
            "http://inv:10080/api/v1/machines?state=healthy&label=env%3Dprod"
        );
        assert_eq!(
            client.machines_url(&[]),
            "http://inv:10080/api/v1/machines"
        );
    }
}
