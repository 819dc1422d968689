/*!
Local network interface enumeration.

This is an external collaborator: the core protocol logic only needs "one
usable IPv4 address per local interface", and how that list is produced is
not part of the tested state machine. The one implementation shipped uses
`pnet::datalink`.
*/

use std::net::Ipv4Addr;

/// A usable local interface: a name and an IPv4 address the communications
/// server can bind a multicast-capable socket to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalInterface {
    pub name: String,
    pub ipv4: Ipv4Addr,
}

/// Enumerates local interfaces with a non-loopback IPv4 address.
///
/// Kept as a free function rather than a trait object: callers that want a
/// different enumeration strategy (a fixed test fixture, a containerized
/// environment with one interface) can simply build `Vec<LocalInterface>`
/// themselves and skip this function entirely -- nothing downstream depends
/// on pnet directly.
pub fn enumerate_ipv4_interfaces() -> Vec<LocalInterface> {
    pnet::datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .flat_map(|iface| {
            let name = iface.name.clone();
            iface
                .ips
                .into_iter()
                .filter_map(move |network| match network.ip() {
                    std::net::IpAddr::V4(ipv4) => Some(LocalInterface {
                        name: name.clone(),
                        ipv4,
                    }),
                    std::net::IpAddr::V6(_) => None,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_does_not_panic() {
        // Environment-dependent; only asserts the call is infallible and
        // that loopback never leaks through.
        for interface in enumerate_ipv4_interfaces() {
            assert!(!interface.ipv4.is_loopback());
        }
    }
}
