//! Pool selection and address validation.

use std::net::Ipv4Addr;

use ipnet::{IpNet, Ipv4Net};
use tunnel_core::EncapMode;
use tunnel_state::{AddressPool, Node};

/// Whether the pool turns `mode` on.
pub fn enables(pool: &AddressPool, mode: EncapMode) -> bool {
    match mode {
        EncapMode::Ipip => pool.ipip_enabled,
        EncapMode::Vxlan => pool.vxlan_enabled,
    }
}

/// CIDRs of the pools that may supply `node` with a `mode` tunnel address.
///
/// A pool qualifies when it enables the mode, is not disabled, is IPv4 and
/// its node selector matches the node. Input order is preserved; the first
/// pool is preferred when assigning. An empty result means the mode is not
/// required on this node.
pub fn enabled_pool_cidrs(node: &Node, pools: &[AddressPool], mode: EncapMode) -> Vec<Ipv4Net> {
    pools
        .iter()
        .filter(|pool| enables(pool, mode) && !pool.disabled && pool.selects(node))
        .filter_map(|pool| match pool.cidr {
            IpNet::V4(cidr) => Some(cidr),
            IpNet::V6(_) => None,
        })
        .collect()
}

/// Whether `address` parses as IPv4 and lies in one of `cidrs`.
///
/// Unparseable input is simply not in range.
pub fn is_ip_in_pool(address: &str, cidrs: &[Ipv4Net]) -> bool {
    match address.parse::<Ipv4Addr>() {
        Ok(ip) => cidrs.iter().any(|cidr| cidr.contains(&ip)),
        Err(_) => false,
    }
}
