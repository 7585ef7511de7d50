//! Prometheus metrics

use crate::decide::Phase;
use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

/// Metrics registry for the controller, served on `/metrics`.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub registry: Registry,
    /// Reconciliation ticks by outcome (completed/command-failed/...)
    pub ticks_total: IntCounterVec,
    /// Operator runs by operator name and outcome
    pub operator_runs_total: IntCounterVec,
    /// 1 for the phase chosen by the latest tick, 0 otherwise
    pub phase: IntGaugeVec,
    /// 1 while this replica holds leadership
    pub leader: IntGauge,
    pub certs_tidied_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let ticks_total = IntCounterVec::new(
            Opts::new("metalops_ticks_total", "Reconciliation ticks by outcome"),
            &["outcome"],
        )?;
        let operator_runs_total = IntCounterVec::new(
            Opts::new(
                "metalops_operator_runs_total",
                "Operator runs by name and outcome",
            ),
            &["operator", "outcome"],
        )?;
        let phase = IntGaugeVec::new(
            Opts::new("metalops_phase", "Current reconciliation phase"),
            &["phase"],
        )?;
        let leader = IntGauge::new("metalops_leader", "Whether this replica is the leader")?;
        let certs_tidied_total = IntCounter::new(
            "metalops_certs_tidied_total",
            "Expired certificates removed by the tidy timer",
        )?;

        registry.register(Box::new(ticks_total.clone()))?;
        registry.register(Box::new(operator_runs_total.clone()))?;
        registry.register(Box::new(phase.clone()))?;
        registry.register(Box::new(leader.clone()))?;
        registry.register(Box::new(certs_tidied_total.clone()))?;

        Ok(Self {
            registry,
            ticks_total,
            operator_runs_total,
            phase,
            leader,
            certs_tidied_total,
        })
    }

    /// Mark `current` as the active phase and clear the rest.
    pub fn set_phase(&self, current: Phase) {
        for p in Phase::ALL {
            self.phase
                .with_label_values(&[p.as_str()])
                .set(i64::from(p == current));
        }
    }
}
