//! Decides and applies the tunnel address for one mode.
//!
//! Given the enabled CIDRs `R` for a mode, the reconciler re-reads the node
//! and moves it to one of two end states:
//!
//! - `R` empty: no address recorded (an existing one is released and cleared);
//! - `R` non-empty: an address inside `R` recorded (kept if already valid,
//!   otherwise the stale one is released first and a fresh one assigned).
//!
//! Node writes go through a read-modify-write loop that re-reads
//! the node on every attempt and retries only on revision conflicts. An
//! address reserved by this pass is released again if it never made it onto
//! the node.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;
use tracing::{debug, error, info, warn};
use tunnel_core::{ATTRIBUTE_NODE, ATTRIBUTE_TYPE, EncapMode, RetryConfig};
use tunnel_state::{AutoAssignArgs, Node};

use crate::client::{IpamClient, NodeClient};
use crate::error::ReconcileError;
use crate::pools::is_ip_in_pool;
use crate::tunnel::TunnelFields;

/// What a reconciliation pass did for one mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No pool enables the mode and the node had no address.
    NotRequired,
    /// No pool enables the mode any more; the address was released and cleared.
    Removed { address: String },
    /// The recorded address is still inside an enabled pool.
    Unchanged { address: String },
    /// A fresh address was recorded, replacing `replaced` if it was stale.
    Assigned {
        address: Ipv4Addr,
        replaced: Option<String>,
    },
}

impl Outcome {
    /// Whether the pass wrote to the node.
    pub fn mutated(&self) -> bool {
        matches!(self, Outcome::Removed { .. } | Outcome::Assigned { .. })
    }
}

/// Reconciles one node's tunnel addresses.
pub struct TunnelReconciler {
    nodes: Arc<dyn NodeClient>,
    ipam: Arc<dyn IpamClient>,
    node_name: String,
    retry: RetryConfig,
}

impl TunnelReconciler {
    pub fn new(
        nodes: Arc<dyn NodeClient>,
        ipam: Arc<dyn IpamClient>,
        node_name: &str,
        retry: RetryConfig,
    ) -> Self {
        Self {
            nodes,
            ipam,
            node_name: node_name.to_string(),
            retry,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Bring the node's `mode` tunnel address in line with `cidrs`.
    ///
    /// Logging goes to whatever span the caller instruments this with.
    pub async fn reconcile(
        &self,
        mode: EncapMode,
        cidrs: &[Ipv4Net],
    ) -> Result<Outcome, ReconcileError> {
        let node = self.get_node().await?;
        let current = node.tunnel_addr(mode).map(str::to_string);

        if cidrs.is_empty() {
            return match current {
                Some(address) => self.remove(mode, address).await,
                None => {
                    debug!("no tunnel address assigned, and not required");
                    Ok(Outcome::NotRequired)
                }
            };
        }

        match current {
            None => {
                debug!("tunnel is not assigned, assigning an address");
                let address = self.assign(mode, cidrs).await?;
                Ok(Outcome::Assigned {
                    address,
                    replaced: None,
                })
            }
            Some(address) if is_ip_in_pool(&address, cidrs) => {
                info!(ip = %address, "tunnel address is still valid");
                Ok(Outcome::Unchanged { address })
            }
            Some(stale) => {
                // Release before assigning: the handle owns one address at a time.
                info!(ip = %stale, "reassigning tunnel address");
                self.release_stale(&stale).await;
                let address = self.assign(mode, cidrs).await?;
                Ok(Outcome::Assigned {
                    address,
                    replaced: Some(stale),
                })
            }
        }
    }

    /// Reserve one address from `cidrs` and record it on the node.
    async fn assign(&self, mode: EncapMode, cidrs: &[Ipv4Net]) -> Result<Ipv4Addr, ReconcileError> {
        let mut attrs = BTreeMap::new();
        attrs.insert(ATTRIBUTE_NODE.to_string(), self.node_name.clone());
        attrs.insert(ATTRIBUTE_TYPE.to_string(), mode.allocation_type().to_string());
        let args = AutoAssignArgs {
            num4: 1,
            handle_id: Some(mode.handle(&self.node_name)),
            attrs,
            hostname: self.node_name.clone(),
            ipv4_pools: cidrs.to_vec(),
        };

        let assigned = self
            .ipam
            .auto_assign(args)
            .await
            .map_err(ReconcileError::AutoAssign)?;
        let Some(&address) = assigned.first() else {
            return Err(ReconcileError::PoolsExhausted);
        };

        let value = address.to_string();
        let written = self
            .update_node(|node| {
                if node.tunnel_addr(mode) == Some(value.as_str()) {
                    return false;
                }
                node.set_tunnel_addr(mode, Some(value.clone()));
                true
            })
            .await;

        if let Err(err) = written {
            // The reservation never reached the node; give it back.
            if let Err(release_err) = self.ipam.release_ips(&[address]).await {
                error!(ip = %address, error = %release_err, "error releasing IP address on failure");
            }
            return Err(err);
        }

        info!(ip = %address, "set tunnel address");
        Ok(address)
    }

    /// Release the recorded address and clear it from the node.
    ///
    /// Every attempt clears whatever address the fresh node carries. One
    /// written there by a concurrent writer since the last read is released
    /// before the write, so nothing is left recorded on success.
    async fn remove(&self, mode: EncapMode, address: String) -> Result<Outcome, ReconcileError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut released: Vec<String> = Vec::new();
        let mut removed = address;
        for attempt in 1..=attempts {
            let mut node = self.get_node().await?;
            let Some(current) = node.tunnel_addr(mode).map(str::to_string) else {
                debug!(attempt, "tunnel address already cleared");
                return Ok(Outcome::Removed { address: removed });
            };
            if !released.contains(&current) {
                self.release_recorded(&current).await?;
                released.push(current.clone());
            }

            node.set_tunnel_addr(mode, None);
            removed = current;
            if self.write_node(&node, attempt, attempts).await? {
                info!(ip = %removed, "removed tunnel address");
                return Ok(Outcome::Removed { address: removed });
            }
        }

        Err(ReconcileError::ConflictRetriesExhausted {
            node: self.node_name.clone(),
            attempts,
        })
    }

    /// Release an address recorded on the node; failure is fatal.
    async fn release_recorded(&self, address: &str) -> Result<(), ReconcileError> {
        let Ok(ip) = address.parse::<Ipv4Addr>() else {
            warn!(ip = %address, "tunnel address is not a valid IPv4 address, clearing it without release");
            return Ok(());
        };
        self.ipam
            .release_ips(&[ip])
            .await
            .map_err(|source| ReconcileError::Release {
                address: address.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Best-effort release of an address that is about to be replaced.
    async fn release_stale(&self, address: &str) {
        let Ok(ip) = address.parse::<Ipv4Addr>() else {
            debug!(ip = %address, "stale tunnel address is not a valid IPv4 address, nothing to release");
            return;
        };
        if let Err(err) = self.ipam.release_ips(&[ip]).await {
            warn!(ip = %ip, error = %err, "error releasing stale tunnel address");
        }
    }

    async fn get_node(&self) -> Result<Node, ReconcileError> {
        self.nodes
            .get(&self.node_name)
            .await
            .map_err(|source| ReconcileError::GetNode {
                node: self.node_name.clone(),
                source,
            })
    }

    /// Read-modify-write the node, retrying on revision conflicts.
    ///
    /// `mutate` returns false when the fresh copy already needs no change,
    /// in which case nothing is written.
    async fn update_node<F>(&self, mut mutate: F) -> Result<(), ReconcileError>
    where
        F: FnMut(&mut Node) -> bool,
    {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            let mut node = self.get_node().await?;
            if !mutate(&mut node) {
                debug!(attempt, "node already up to date");
                return Ok(());
            }
            if self.write_node(&node, attempt, attempts).await? {
                return Ok(());
            }
        }

        Err(ReconcileError::ConflictRetriesExhausted {
            node: self.node_name.clone(),
            attempts,
        })
    }

    /// One revision-checked write. Ok(false) means it lost to a concurrent
    /// writer and the caller should re-read; the backoff has already run
    /// unless this was the last attempt.
    async fn write_node(&self, node: &Node, attempt: u32, attempts: u32) -> Result<bool, ReconcileError> {
        match self.nodes.update(node).await {
            Ok(revision) => {
                debug!(attempt, %revision, "node updated");
                Ok(true)
            }
            Err(err) if err.is_conflict() => {
                info!(attempt, error = %err, "conflict updating node, retrying");
                if attempt < attempts {
                    tokio::time::sleep(self.retry.backoff()).await;
                }
                Ok(false)
            }
            Err(source) => Err(ReconcileError::UpdateNode {
                node: self.node_name.clone(),
                source,
            }),
        }
    }
}
