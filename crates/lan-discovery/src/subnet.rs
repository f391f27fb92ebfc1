//! Broadcast address derivation for local subnets

use ipnet::Ipv4Net;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// Compute the directed broadcast address for `ip` under `mask`
///
/// Each octet is `ip | !mask`; for contiguous masks this matches
/// `Ipv4Net::broadcast`. The default /24 mask sets the last octet to 255.
pub fn broadcast_address(ip: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    match Ipv4Net::with_netmask(ip, mask) {
        Ok(net) => net.broadcast(),
        // Non-contiguous mask; fall back to the raw octet formula
        Err(_) => {
            let ip = ip.octets();
            let mask = mask.octets();
            Ipv4Addr::new(
                ip[0] | !mask[0],
                ip[1] | !mask[1],
                ip[2] | !mask[2],
                ip[3] | !mask[3],
            )
        }
    }
}

/// All non-loopback IPv4 interface addresses on this host
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            debug!("Failed to enumerate network interfaces: {}", e);
            return Vec::new();
        }
    };

    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect()
}

/// One directed broadcast address per local subnet, deduplicated
pub fn local_broadcast_addresses(mask: Ipv4Addr) -> Vec<Ipv4Addr> {
    let mut addresses: Vec<Ipv4Addr> = local_ipv4_addresses()
        .into_iter()
        .map(|ip| broadcast_address(ip, mask))
        .collect();
    addresses.sort_unstable();
    addresses.dedup();
    addresses
}

/// First non-loopback IPv4 address, falling back to loopback
pub fn primary_local_ip() -> IpAddr {
    local_ipv4_addresses()
        .into_iter()
        .next()
        .map(IpAddr::V4)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
