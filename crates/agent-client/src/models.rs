//! Agent API models

use ::models::Mount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything needed to start a managed container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Container name, unique per node
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub binds: Vec<Mount>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Observed state of a container on a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    pub running: bool,
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub binds: Vec<Mount>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A file to be written on a node (certificates, config files).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileSpec {
    pub path: String,
    /// Octal mode, e.g. 0o600 for key material
    pub mode: u32,
    pub content: String,
}
