//! Shared types used across the tunnel address crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Allocation attribute naming the node that owns an address.
pub const ATTRIBUTE_NODE: &str = "node";

/// Allocation attribute naming what an address is used for.
pub const ATTRIBUTE_TYPE: &str = "type";

/// Overlay encapsulation scheme that needs its own per-node tunnel address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncapMode {
    Ipip,
    Vxlan,
}

impl EncapMode {
    /// Every mode, in the order the driver reconciles them.
    pub const ALL: [EncapMode; 2] = [EncapMode::Ipip, EncapMode::Vxlan];

    /// Value of the `type` attribute on allocations made for this mode.
    pub fn allocation_type(self) -> &'static str {
        match self {
            EncapMode::Ipip => "ipipTunnelAddress",
            EncapMode::Vxlan => "vxlanTunnelAddress",
        }
    }

    /// Stable allocation handle for this mode on the given node.
    pub fn handle(self, node_name: &str) -> String {
        match self {
            EncapMode::Ipip => format!("ipip-tunnel-addr-{node_name}"),
            EncapMode::Vxlan => format!("vxlan-tunnel-addr-{node_name}"),
        }
    }
}

impl fmt::Display for EncapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncapMode::Ipip => f.write_str("ipip"),
            EncapMode::Vxlan => f.write_str("vxlan"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_distinct_per_mode() {
        assert_eq!(EncapMode::Ipip.handle("node-1"), "ipip-tunnel-addr-node-1");
        assert_eq!(EncapMode::Vxlan.handle("node-1"), "vxlan-tunnel-addr-node-1");
    }

    #[test]
    fn allocation_types() {
        assert_eq!(EncapMode::Ipip.allocation_type(), "ipipTunnelAddress");
        assert_eq!(EncapMode::Vxlan.allocation_type(), "vxlanTunnelAddress");
    }
}
