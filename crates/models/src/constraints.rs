//! Cluster constraints
//!
//! The replication constraints the machine scheduler must honor when
//! turning the machine pool into a concrete node set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures for [`Constraints`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstraintsError {
    /// The control plane can never be collapsed to zero members
    #[error("control plane count must be at least 1")]
    NoControlPlane,

    /// Maximum workers below minimum workers is unsatisfiable
    #[error("maximum workers ({max}) is below minimum workers ({min})")]
    WorkerBoundsInverted { min: usize, max: usize },
}

/// Desired replication counts for the cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    /// Desired number of control-plane nodes
    pub control_plane_count: usize,
    /// Minimum number of worker nodes
    #[serde(default)]
    pub minimum_workers: usize,
    /// Optional cap on worker nodes
    #[serde(default)]
    pub maximum_workers: Option<usize>,
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            control_plane_count: 1,
            minimum_workers: 1,
            maximum_workers: None,
        }
    }
}

impl Constraints {
    /// Reject constraint sets the scheduler could never satisfy safely.
    pub fn validate(&self) -> Result<(), ConstraintsError> {
        if self.control_plane_count == 0 {
            return Err(ConstraintsError::NoControlPlane);
        }
        if let Some(max) = self.maximum_workers {
            if max < self.minimum_workers {
                return Err(ConstraintsError::WorkerBoundsInverted {
                    min: self.minimum_workers,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Worker headroom left under the configured maximum.
    pub fn worker_headroom(&self, current_workers: usize) -> usize {
        match self.maximum_workers {
            Some(max) => max.saturating_sub(current_workers),
            None => usize::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_control_plane_is_rejected() {
        let c = Constraints {
            control_plane_count: 0,
            minimum_workers: 0,
            maximum_workers: None,
        };
        assert_eq!(c.validate(), Err(ConstraintsError::NoControlPlane));
    }

    #[test]
    fn inverted_worker_bounds_are_rejected() {
        let c = Constraints {
            control_plane_count: 3,
            minimum_workers: 5,
            maximum_workers: Some(2),
        };
        assert!(matches!(
            c.validate(),
            Err(ConstraintsError::WorkerBoundsInverted { min: 5, max: 2 })
        ));
    }

    #[test]
    fn headroom_is_unbounded_without_maximum() {
        let c = Constraints {
            control_plane_count: 1,
            minimum_workers: 1,
            maximum_workers: None,
        };
        assert_eq!(c.worker_headroom(100), usize::MAX);
        let capped = Constraints {
            maximum_workers: Some(4),
            ..c
        };
        assert_eq!(capped.worker_headroom(3), 1);
        assert_eq!(capped.worker_headroom(9), 0);
    }
}
