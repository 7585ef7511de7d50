//! Mock inventory client for unit testing
//!
//! Stores machines in memory and evaluates the same filter predicates as
//! the real service, so controller tests exercise the query contract
//! without a running inventory.

use crate::error::InventoryError;
use crate::inventory_trait::InventoryApi;
use models::Machine;
use std::sync::{Arc, Mutex};

/// Mock inventory client for testing
#[derive(Clone)]
pub struct MockInventoryClient {
    base_url: String,
    machines: Arc<Mutex<Vec<Machine>>>,
    fail: Arc<Mutex<Option<String>>>,
}

impl MockInventoryClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            machines: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(Mutex::new(None)),
        }
    }

    /// Add a machine to the mock store (for test setup)
    pub fn add_machine(&self, machine: Machine) {
        self.machines.lock().unwrap().push(machine);
    }

    /// Replace the whole machine set (for test setup)
    pub fn set_machines(&self, machines: Vec<Machine>) {
        *self.machines.lock().unwrap() = machines;
    }

    /// Make every subsequent call fail with an API error
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail.lock().unwrap() = Some(message.into());
    }

    fn check_fail(&self) -> Result<(), InventoryError> {
        if let Some(msg) = self.fail.lock().unwrap().clone() {
            return Err(InventoryError::Api(msg));
        }
        Ok(())
    }

    fn matches(machine: &Machine, key: &str, value: &str) -> bool {
        match key {
            "serial" => machine.spec.serial == value,
            "rack" => machine.spec.rack.to_string() == value,
            "role" => machine.spec.role == value,
            "state" => machine.status.state.to_string() == value,
            "label" => match value.split_once('=') {
                Some((k, v)) => machine.spec.labels.get(k).map(String::as_str) == Some(v),
                None => false,
            },
            "min-days-before-retire" => {
                let days: i64 = value.parse().unwrap_or(0);
                machine.days_before_retire(chrono::Utc::now()) >= days
            }
            _ => true,
        }
    }
}

#[async_trait::async_trait]
impl InventoryApi for MockInventoryClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_machines(&self, filters: &[(&str, &str)]) -> Result<Vec<Machine>, InventoryError> {
        self.check_fail()?;
        let machines = self.machines.lock().unwrap().clone();
        Ok(machines
            .into_iter()
            .filter(|m| {
                filters.iter().all(|(k, v)| match k.strip_prefix("without-") {
                    Some(positive) => !Self::matches(m, positive, v),
                    None => Self::matches(m, k, v),
                })
            })
            .collect())
    }

    async fn get_machine(&self, serial: &str) -> Result<Machine, InventoryError> {
        self.check_fail()?;
        self.machines
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.spec.serial == serial)
            .cloned()
            .ok_or_else(|| InventoryError::NotFound(format!("machine {}", serial)))
    }
}
