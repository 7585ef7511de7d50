//! metalops persistence layer
//!
//! Everything the engine persists lives in etcd under the `/metalops/`
//! prefix:
//! - the desired [`Cluster`](models::Cluster) and
//!   [`Constraints`](models::Constraints), written with compare-and-swap
//!   on the etcd mod revision so stale writers fail harmlessly
//! - audit [`Record`](models::Record)s, one per operation run, with a
//!   crash-recovery sweep that cancels records left running by a dead
//!   leader
//! - the config-schema version and its migrations
//! - the certificate inventory swept by the expiry tidy timer
//!
//! Leader election is a lease-backed etcd election; losing the lease is
//! surfaced through a watch channel and handled by re-campaigning, never
//! by process exit.

pub mod certs;
pub mod election;
pub mod error;
pub mod records;
pub mod store;

pub use certs::CertEntry;
pub use election::{Election, Leadership};
pub use error::StorageError;
pub use records::RecordSink;
pub use store::{CURRENT_VERSION, Storage};

#[cfg(any(test, feature = "test-util"))]
pub use records::MemoryRecordSink;

/// Prefix under which every metalops key lives.
pub const KEY_PREFIX: &str = "/metalops/";

pub(crate) const KEY_CLUSTER: &str = "/metalops/cluster";
pub(crate) const KEY_CONSTRAINTS: &str = "/metalops/constraints";
pub(crate) const KEY_VERSION: &str = "/metalops/version";
pub(crate) const KEY_LAST_RECORD_ID: &str = "/metalops/last-record-id";
pub(crate) const KEY_RECORDS_PREFIX: &str = "/metalops/records/";
pub(crate) const KEY_CERTS_PREFIX: &str = "/metalops/certs/";
pub(crate) const KEY_ELECTION: &str = "/metalops/leader";

/// Record key for a given id, zero-padded so lexicographic order is id order.
pub(crate) fn record_key(id: u64) -> String {
    format!("{}{:016}", KEY_RECORDS_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keys_sort_by_id() {
        assert!(record_key(2) < record_key(10));
        assert_eq!(record_key(7), "/metalops/records/0000000000000007");
    }
}
