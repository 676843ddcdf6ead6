//! One reconciliation pass per encapsulation mode.
//!
//! The node and pool list are read once up front; the enabled CIDRs for
//! each mode are derived from that snapshot. Modes are reconciled one after
//! the other and independently: a failure in IPIP does not stop VXLAN, and
//! every failure is returned.

use std::sync::Arc;

use tracing::{Instrument, info, info_span};
use tunnel_core::{EncapMode, RetryConfig};
use tunnel_state::StateStore;

use crate::client::{IpamClient, NodeClient, PoolClient};
use crate::error::{DriverError, ModeFailure};
use crate::pools::enabled_pool_cidrs;
use crate::reconciler::{Outcome, TunnelReconciler};

/// Per-mode outcomes of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub outcomes: Vec<(EncapMode, Outcome)>,
}

impl Report {
    pub fn outcome(&self, mode: EncapMode) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, outcome)| outcome)
    }
}

pub struct Driver {
    nodes: Arc<dyn NodeClient>,
    pools: Arc<dyn PoolClient>,
    reconciler: TunnelReconciler,
}

impl Driver {
    pub fn new(
        nodes: Arc<dyn NodeClient>,
        pools: Arc<dyn PoolClient>,
        ipam: Arc<dyn IpamClient>,
        node_name: &str,
        retry: RetryConfig,
    ) -> Self {
        let reconciler = TunnelReconciler::new(nodes.clone(), ipam, node_name, retry);
        Self {
            nodes,
            pools,
            reconciler,
        }
    }

    /// Driver backed entirely by the embedded datastore.
    pub fn from_store(store: StateStore, node_name: &str, retry: RetryConfig) -> Self {
        let store = Arc::new(store);
        Self::new(store.clone(), store.clone(), store, node_name, retry)
    }

    pub async fn run(&self) -> Result<Report, DriverError> {
        let node_name = self.reconciler.node_name();
        let node = self
            .nodes
            .get(node_name)
            .await
            .map_err(|source| DriverError::Node {
                node: node_name.to_string(),
                source,
            })?;
        let pools = self.pools.list().await.map_err(DriverError::Pools)?;
        info!(node = %node_name, pools = pools.len(), "loaded node and pool configuration");

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        for mode in EncapMode::ALL {
            let cidrs = enabled_pool_cidrs(&node, &pools, mode);
            let span = info_span!("tunnel_address", node = %node_name, "type" = mode.allocation_type());
            match self.reconciler.reconcile(mode, &cidrs).instrument(span).await {
                Ok(outcome) => outcomes.push((mode, outcome)),
                Err(error) => failures.push(ModeFailure { mode, error }),
            }
        }

        if failures.is_empty() {
            Ok(Report { outcomes })
        } else {
            Err(DriverError::Reconcile(failures))
        }
    }
}
