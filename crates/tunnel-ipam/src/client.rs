//! Client traits for the services the reconciler talks to.
//!
//! Each trait is injected as `Arc<dyn ...>` so tests can script conflicts
//! and failures. [`StateStore`] implements all three.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tunnel_state::{AddressPool, AutoAssignArgs, Node, Revision, StateError, StateResult, StateStore};

/// Versioned node records.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch a node together with its current revision.
    async fn get(&self, name: &str) -> StateResult<Node>;

    /// Write back a node read earlier. Must fail with
    /// [`StateError::Conflict`] when `node.revision` is stale.
    async fn update(&self, node: &Node) -> StateResult<Revision>;
}

/// Read-only access to the configured address pools.
#[async_trait]
pub trait PoolClient: Send + Sync {
    async fn list(&self) -> StateResult<Vec<AddressPool>>;
}

/// Address allocation service.
#[async_trait]
pub trait IpamClient: Send + Sync {
    /// Reserve addresses. An empty result means the pools are exhausted.
    async fn auto_assign(&self, args: AutoAssignArgs) -> StateResult<Vec<Ipv4Addr>>;

    /// Release addresses. Releasing a free address is not an error.
    async fn release_ips(&self, addresses: &[Ipv4Addr]) -> StateResult<usize>;
}

#[async_trait]
impl NodeClient for StateStore {
    async fn get(&self, name: &str) -> StateResult<Node> {
        self.get_node(name)?
            .ok_or_else(|| StateError::NotFound(format!("node {name}")))
    }

    async fn update(&self, node: &Node) -> StateResult<Revision> {
        self.update_node(node)
    }
}

#[async_trait]
impl PoolClient for StateStore {
    async fn list(&self) -> StateResult<Vec<AddressPool>> {
        self.list_pools()
    }
}

#[async_trait]
impl IpamClient for StateStore {
    async fn auto_assign(&self, args: AutoAssignArgs) -> StateResult<Vec<Ipv4Addr>> {
        StateStore::auto_assign(self, &args)
    }

    async fn release_ips(&self, addresses: &[Ipv4Addr]) -> StateResult<usize> {
        StateStore::release_ips(self, addresses)
    }
}
