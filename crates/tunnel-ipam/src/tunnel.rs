//! Mode-specific access to a node's tunnel address fields.
//!
//! The IPIP address lives in the node's BGP section, the VXLAN address at
//! the top of the spec. Callers only ever see one address per mode.

use tunnel_core::EncapMode;
use tunnel_state::Node;

pub trait TunnelFields {
    /// The recorded tunnel address for `mode`. Empty strings count as unset.
    fn tunnel_addr(&self, mode: EncapMode) -> Option<&str>;

    /// Record or clear the tunnel address for `mode`, leaving every other
    /// field untouched.
    fn set_tunnel_addr(&mut self, mode: EncapMode, address: Option<String>);
}

impl TunnelFields for Node {
    fn tunnel_addr(&self, mode: EncapMode) -> Option<&str> {
        let address = match mode {
            EncapMode::Ipip => self
                .spec
                .bgp
                .as_ref()
                .and_then(|bgp| bgp.ipv4_ipip_tunnel_addr.as_deref()),
            EncapMode::Vxlan => self.spec.ipv4_vxlan_tunnel_addr.as_deref(),
        };
        address.filter(|a| !a.is_empty())
    }

    fn set_tunnel_addr(&mut self, mode: EncapMode, address: Option<String>) {
        match mode {
            EncapMode::Ipip => match address {
                Some(address) => {
                    self.spec.bgp.get_or_insert_with(Default::default).ipv4_ipip_tunnel_addr =
                        Some(address);
                }
                // Clearing never creates a BGP section.
                None => {
                    if let Some(bgp) = self.spec.bgp.as_mut() {
                        bgp.ipv4_ipip_tunnel_addr = None;
                    }
                }
            },
            EncapMode::Vxlan => self.spec.ipv4_vxlan_tunnel_addr = address,
        }
    }
}
