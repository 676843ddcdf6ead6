//! Error types for tunnel address reconciliation.
//!
//! Every variant is terminal for the current pass. Conflicts on node writes
//! are retried inside the reconciler and only surface once the attempt
//! budget is spent.

use thiserror::Error;
use tunnel_core::EncapMode;
use tunnel_state::StateError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("error getting node '{node}': {source}")]
    GetNode { node: String, source: StateError },

    #[error("unable to auto-assign an address: {0}")]
    AutoAssign(#[source] StateError),

    #[error("unable to auto-assign an address: pools are likely exhausted")]
    PoolsExhausted,

    #[error("error releasing address {address}: {source}")]
    Release { address: String, source: StateError },

    #[error("unable to update node '{node}': {source}")]
    UpdateNode { node: String, source: StateError },

    #[error("node '{node}' still conflicting after {attempts} update attempts")]
    ConflictRetriesExhausted { node: String, attempts: u32 },
}

/// A reconciliation failure for one mode.
#[derive(Debug)]
pub struct ModeFailure {
    pub mode: EncapMode,
    pub error: ReconcileError,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to fetch node resource '{node}': {source}")]
    Node { node: String, source: StateError },

    #[error("unable to query IP pool configuration: {0}")]
    Pools(#[source] StateError),

    #[error("tunnel address reconciliation failed: {}", describe(.0))]
    Reconcile(Vec<ModeFailure>),
}

fn describe(failures: &[ModeFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.mode, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}
