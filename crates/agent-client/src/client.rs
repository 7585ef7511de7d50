//! Node agent API client
//!
//! Talks to the agent daemon on each managed machine over HTTP. The
//! agent listens on a fixed port on every node; the client is
//! constructed once and takes the node address per call.

use crate::agent_trait::AgentApi;
use crate::error::AgentError;
use crate::models::{ContainerSpec, ContainerState, FileSpec};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Node agent API client
pub struct AgentClient {
    client: Client,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct AgentErrorBody {
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct ExistsBody {
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    healthy: bool,
}

impl AgentClient {
    /// Create a new agent client talking to `http://{addr}:{port}`.
    pub fn new(port: u16) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(AgentError::Http)?;
        Ok(Self { client, port })
    }

    fn url(&self, addr: &str, path: &str) -> String {
        format!("http://{}:{}/api/v1{}", addr, self.port, path)
    }

    async fn check(addr: &str, response: reqwest::Response) -> Result<reqwest::Response, AgentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: AgentErrorBody = response.json().await.unwrap_or(AgentErrorBody {
            error: String::new(),
        });
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AgentError::NotFound {
                addr: addr.to_string(),
                what: body.error,
            });
        }
        Err(AgentError::Api {
            addr: addr.to_string(),
            message: format!("{} - {}", status, body.error),
        })
    }

    async fn post(&self, addr: &str, path: &str, body: &serde_json::Value) -> Result<(), AgentError> {
        debug!("POST {}{}", addr, path);
        let response = self
            .client
            .post(self.url(addr, path))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    AgentError::Unreachable(addr.to_string())
                } else {
                    AgentError::Http(e)
                }
            })?;
        Self::check(addr, response).await.map(|_| ())
    }
}

#[async_trait::async_trait]
impl AgentApi for AgentClient {
    async fn ping(&self, addr: &str) -> Result<(), AgentError> {
        let response = self
            .client
            .get(self.url(addr, "/ping"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|_| AgentError::Unreachable(addr.to_string()))?;
        Self::check(addr, response).await.map(|_| ())
    }

    async fn pull_image(&self, addr: &str, image: &str) -> Result<(), AgentError> {
        self.post(addr, "/images/pull", &serde_json::json!({ "image": image }))
            .await
    }

    async fn run_container(&self, addr: &str, spec: &ContainerSpec) -> Result<(), AgentError> {
        self.post(addr, "/containers/run", &serde_json::to_value(spec)?)
            .await
    }

    async fn stop_container(&self, addr: &str, name: &str) -> Result<(), AgentError> {
        self.post(
            addr,
            &format!("/containers/{}/stop", urlencoding::encode(name)),
            &serde_json::json!({}),
        )
        .await
    }

    async fn remove_container(&self, addr: &str, name: &str) -> Result<(), AgentError> {
        self.post(
            addr,
            &format!("/containers/{}/remove", urlencoding::encode(name)),
            &serde_json::json!({}),
        )
        .await
    }

    async fn inspect(
        &self,
        addr: &str,
        name: &str,
    ) -> Result<Option<ContainerState>, AgentError> {
        let response = self
            .client
            .get(self.url(addr, &format!("/containers/{}", urlencoding::encode(name))))
            .send()
            .await
            .map_err(|_| AgentError::Unreachable(addr.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(addr, response).await?;
        Ok(Some(response.json().await?))
    }

    async fn write_files(&self, addr: &str, files: &[FileSpec]) -> Result<(), AgentError> {
        self.post(addr, "/files", &serde_json::json!({ "files": files }))
            .await
    }

    async fn remove_path(&self, addr: &str, path: &str) -> Result<(), AgentError> {
        self.post(addr, "/files/remove", &serde_json::json!({ "path": path }))
            .await
    }

    async fn path_exists(&self, addr: &str, path: &str) -> Result<bool, AgentError> {
        let response = self
            .client
            .get(self.url(addr, "/files/exists"))
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|_| AgentError::Unreachable(addr.to_string()))?;
        let response = Self::check(addr, response).await?;
        let body: ExistsBody = response.json().await?;
        Ok(body.exists)
    }

    async fn http_health(&self, addr: &str, port: u16, path: &str) -> Result<bool, AgentError> {
        let response = self
            .client
            .get(self.url(addr, "/probe"))
            .query(&[("port", &port.to_string()), ("path", &path.to_string())])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|_| AgentError::Unreachable(addr.to_string()))?;
        let response = Self::check(addr, response).await?;
        let body: HealthBody = response.json().await?;
        Ok(body.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_layout() {
        let client = AgentClient::new(9105).unwrap();
        assert_eq!(
            client.url("10.0.1.4", "/containers/run"),
            "http://10.0.1.4:9105/api/v1/containers/run"
        );
    }
}
