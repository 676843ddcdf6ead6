//! tunnel-ipam — keeps a node's IPIP and VXLAN tunnel addresses in step with
//! the encapsulation-enabled address pools.
//!
//! The [`Driver`] reads the node and pool list once, derives the enabled
//! CIDRs per [`EncapMode`](tunnel_core::EncapMode) and hands each set to the
//! [`TunnelReconciler`], which assigns, keeps, replaces or removes the
//! node's address for that mode. Node writes are read-modify-write with a
//! revision check and a bounded, fixed-interval retry on conflict.

pub mod client;
pub mod driver;
pub mod error;
pub mod pools;
pub mod reconciler;
pub mod tunnel;

#[cfg(test)]
mod fake;

pub use client::{IpamClient, NodeClient, PoolClient};
pub use driver::{Driver, Report};
pub use error::{DriverError, ModeFailure, ReconcileError};
pub use reconciler::{Outcome, TunnelReconciler};
pub use tunnel::TunnelFields;
