//! Domain events emitted by the storage layer.
//!
//! Sweep outcomes never propagate to the caller whose write triggered the
//! evaluation; the write has already returned. They are broadcast here
//! instead, so operators can observe them and tests can assert on sweep
//! results deterministically instead of polling the store.

use serde::{Deserialize, Serialize};

/// Events published on the storage broadcast channel.
///
/// Timestamps are unix seconds, matching the persisted `updated_at` columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DomainEvent {
    /// An expiry sweep deleted every stale row for one customer.
    SweepCompleted {
        customer_id: String,
        /// The write timestamp that triggered the sweep.
        triggered_at: i64,
        /// Rows with `updated_at` strictly below this were deleted.
        cutoff: i64,
        instances_deleted: usize,
        groups_deleted: usize,
        links_deleted: usize,
    },

    /// An expiry sweep failed; the customer's baseline is left unchanged so
    /// a later qualifying write retries the sweep.
    SweepFailed {
        customer_id: String,
        triggered_at: i64,
        reason: String,
    },
}

impl DomainEvent {
    /// The customer the event concerns.
    pub fn customer_id(&self) -> &str {
        match self {
            DomainEvent::SweepCompleted { customer_id, .. } => customer_id,
            DomainEvent::SweepFailed { customer_id, .. } => customer_id,
        }
    }
}
