//! Domain types stored in the datastore.
//!
//! Nodes and pools are written by other controllers; this system only ever
//! changes the two tunnel address fields of a node. Allocations are created
//! and released exclusively through [`crate::StateStore::auto_assign`] and
//! [`crate::StateStore::release_ips`].

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};

/// Node names are unique across the cluster.
pub type NodeName = String;

/// Opaque optimistic-concurrency token carried by every node record.
///
/// The store bumps it on each successful write and rejects writes that
/// supply anything other than the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    pub fn next(self) -> Self {
        Revision(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// A cluster node record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub name: NodeName,
    /// Revision read with this record; `Revision(0)` for a record not yet stored.
    #[serde(default)]
    pub revision: Revision,
    /// Labels matched against pool node selectors.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: NodeSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    /// BGP configuration. Absent on nodes that never ran BGP.
    pub bgp: Option<NodeBgpSpec>,
    /// Endpoint address of the VXLAN tunnel device.
    pub ipv4_vxlan_tunnel_addr: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeBgpSpec {
    /// Host address with prefix length, e.g. `192.168.1.10/24`.
    pub ipv4_address: Option<String>,
    pub as_number: Option<u32>,
    /// Endpoint address of the IPIP tunnel device.
    pub ipv4_ipip_tunnel_addr: Option<String>,
}

impl Node {
    /// A node with no labels and an empty spec.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

// ── Address pool ──────────────────────────────────────────────────

/// A range of addresses that tunnel endpoints may be drawn from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddressPool {
    pub name: String,
    pub cidr: IpNet,
    #[serde(default)]
    pub ipip_enabled: bool,
    #[serde(default)]
    pub vxlan_enabled: bool,
    /// A disabled pool hands out no new addresses and validates none.
    #[serde(default)]
    pub disabled: bool,
    /// Labels a node must carry for this pool to apply. Empty selects all nodes.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

impl AddressPool {
    pub fn new(name: &str, cidr: IpNet) -> Self {
        Self {
            name: name.to_string(),
            cidr,
            ipip_enabled: false,
            vxlan_enabled: false,
            disabled: false,
            node_selector: BTreeMap::new(),
        }
    }

    pub fn with_ipip(mut self) -> Self {
        self.ipip_enabled = true;
        self
    }

    pub fn with_vxlan(mut self) -> Self {
        self.vxlan_enabled = true;
        self
    }

    pub fn with_selector(mut self, key: &str, value: &str) -> Self {
        self.node_selector.insert(key.to_string(), value.to_string());
        self
    }

    /// Whether every selector label is present on the node with the same value.
    pub fn selects(&self, node: &Node) -> bool {
        self.node_selector
            .iter()
            .all(|(k, v)| node.labels.get(k) == Some(v))
    }
}

// ── Allocation ────────────────────────────────────────────────────

/// An address reserved in some pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub address: Ipv4Addr,
    pub pool: Ipv4Net,
    pub handle: Option<String>,
    pub hostname: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

/// Parameters for [`crate::StateStore::auto_assign`].
#[derive(Debug, Clone, PartialEq)]
pub struct AutoAssignArgs {
    /// Number of IPv4 addresses to reserve.
    pub num4: u32,
    /// A handle owns at most one address, so `num4` must be 1 when set.
    pub handle_id: Option<String>,
    pub attrs: BTreeMap<String, String>,
    pub hostname: String,
    /// Candidate pools, tried in order.
    pub ipv4_pools: Vec<Ipv4Net>,
}
