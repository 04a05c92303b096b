use std::net::{IpAddr, Ipv4Addr};

/// Canonical remote address: strips the IPv4-mapped-IPv6 prefix so that
/// `::ffff:1.2.3.4` and `1.2.3.4` compare equal. This is the only address
/// ever used for validator policy; forwarded headers are spoofable and are
/// never consulted.
pub fn canonical_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Strict dotted-quad check used before fanning out to broadcast worker ips.
pub fn is_valid_ipv4(value: &str) -> bool {
    value.parse::<Ipv4Addr>().is_ok()
}
