//! Machine scoring
//!
//! Ranks machines for addition to and removal from the cluster. Scoring
//! is a pure function of (machine, current rack-allocation count, current
//! time): a monotonic bonus ladder on days until the retire date, minus a
//! capped penalty per machine already allocated from the same rack, minus
//! a large penalty when the machine is not healthy.
//!
//! The band and cap constants have no derivation beyond operational
//! experience; they are kept configurable rather than re-derived.

use chrono::{DateTime, Utc};
use models::Machine;

/// Tunables for the scoring ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringConfig {
    /// Retire-date bands in days, ascending; each band is worth its own
    /// width in score, mirrored for machines past their retire date
    pub band_days: [i64; 3],
    /// At most this many same-rack machines count against a candidate
    pub rack_count_cap: usize,
    /// Penalty per same-rack machine already allocated
    pub rack_penalty: i64,
    /// Penalty for a machine whose state is not healthy
    pub unhealthy_penalty: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            band_days: [250, 500, 1000],
            rack_count_cap: 10,
            rack_penalty: 10,
            unhealthy_penalty: 10_000,
        }
    }
}

/// Score one machine. Higher is preferred for addition; removal takes
/// the lowest.
pub fn score(
    machine: &Machine,
    same_rack_allocated: usize,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> i64 {
    let days = machine.days_before_retire(now);
    let [b0, b1, b2] = config.band_days;
    let mut s = if days >= b2 {
        b2
    } else if days >= b1 {
        b1
    } else if days >= b0 {
        b0
    } else if days >= 0 {
        0
    } else if days >= -b0 {
        -b0
    } else if days >= -b1 {
        -b1
    } else {
        -b2
    };
    s -= config.rack_penalty * same_rack_allocated.min(config.rack_count_cap) as i64;
    if !machine.status.state.is_healthy() {
        s -= config.unhealthy_penalty;
    }
    s
}
