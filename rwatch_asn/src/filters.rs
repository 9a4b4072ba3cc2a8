//! Address classification mirroring the semantics the upstream dataset
//! filter needs. Only public global-unicast space is eligible for the ASN
//! map.

use std::net::IpAddr;

/// Returns `true` for addresses that are plain unicast: not unspecified,
/// loopback, multicast, link-local, or (for IPv4) broadcast. Private ranges
/// still count as unicast here; they are rejected by [`is_private`].
pub fn is_global_unicast(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !v4.is_unspecified()
                && !v4.is_loopback()
                && !v4.is_multicast()
                && !v4.is_broadcast()
                && !v4.is_link_local()
        }
        IpAddr::V6(v6) => {
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !v6.is_unspecified() && !v6.is_loopback() && !v6.is_multicast() && !link_local
        }
    }
}

/// RFC 1918 private IPv4 space and RFC 4193 unique-local IPv6 space.
pub fn is_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`). The v6 feed should never
/// contain these; they would shadow genuine IPv4 entries.
pub fn is_ipv4_mapped(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(_) => false,
        IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::{is_global_unicast, is_ipv4_mapped, is_private};
    use std::net::IpAddr;

    fn addr(text: &str) -> IpAddr {
        text.parse().expect("address literal")
    }

    #[test]
    fn special_purpose_space_is_not_global_unicast() {
        for special in [
            "0.0.0.0",
            "127.0.0.1",
            "224.0.0.1",
            "255.255.255.255",
            "169.254.1.1",
            "::",
            "::1",
            "ff02::1",
            "fe80::1",
        ] {
            assert!(!is_global_unicast(addr(special)), "{special}");
        }

        assert!(is_global_unicast(addr("151.101.0.1")));
        assert!(is_global_unicast(addr("2a04:4e42::1")));
        // Private space is still unicast; exclusion happens separately.
        assert!(is_global_unicast(addr("10.1.2.3")));
    }

    #[test]
    fn private_space_is_detected() {
        for private in ["10.0.0.1", "172.16.0.1", "192.168.1.1", "fc00::1", "fd12::1"] {
            assert!(is_private(addr(private)), "{private}");
        }

        for public in ["11.0.0.1", "172.32.0.1", "8.8.8.8", "2001:db8::1"] {
            assert!(!is_private(addr(public)), "{public}");
        }
    }

    #[test]
    fn mapped_v4_in_v6_is_detected() {
        assert!(is_ipv4_mapped(addr("::ffff:1.2.3.4")));
        assert!(!is_ipv4_mapped(addr("2a04:4e42::1")));
        assert!(!is_ipv4_mapped(addr("1.2.3.4")));
    }
}
