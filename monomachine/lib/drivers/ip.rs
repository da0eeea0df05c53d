//! Picking the address a machine is reached at.

use std::net::{IpAddr, Ipv4Addr};

use crate::config::DEFAULT_BRIDGE_IP;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Selects the address to use from the addresses a backend reports, in NIC order.
///
/// The first global unicast IPv4 address that is not the container bridge wins. When none
/// qualifies, the first address is returned as is. `None` means no address was reported at all.
pub fn select_preferred_ip<S: AsRef<str>>(addresses: &[S]) -> Option<String> {
    addresses
        .iter()
        .map(AsRef::as_ref)
        .find(|candidate| is_preferred(candidate))
        .or_else(|| addresses.first().map(AsRef::as_ref))
        .map(String::from)
}

/// The engine URL for an address, or an empty string when there is no address.
pub fn engine_url(ip: &str, port: u16) -> String {
    if ip.is_empty() {
        return String::new();
    }

    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("tcp://[{ip}]:{port}"),
        _ => format!("tcp://{ip}:{port}"),
    }
}

fn is_preferred(candidate: &str) -> bool {
    if candidate == DEFAULT_BRIDGE_IP {
        return false;
    }

    match candidate.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => is_global_unicast_v4(ip),
        _ => false,
    }
}

fn is_global_unicast_v4(ip: Ipv4Addr) -> bool {
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
