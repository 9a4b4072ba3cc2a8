use fxhash::FxHashMap;
use ip_network::{IpNetwork, Ipv4Network, Ipv6Network};
use std::net::IpAddr;

/// A mapping from CIDR prefix to `V` supporting exact lookups and
/// address-keyed longest-prefix retrieval across both address families.
///
/// The two families are kept in independent maps keyed by the canonical
/// (masked) prefix, with the observed range of prefix lengths tracked per
/// family so an address lookup only probes lengths that can exist.
#[derive(Clone, Debug)]
pub struct PrefixMap<V> {
    ipv4: FxHashMap<Ipv4Network, V>,
    ipv6: FxHashMap<Ipv6Network, V>,
    ipv4_bits: PrefixBitRange,
    ipv6_bits: PrefixBitRange,
}

impl<V> Default for PrefixMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> PrefixMap<V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            ipv4: FxHashMap::default(),
            ipv6: FxHashMap::default(),
            ipv4_bits: PrefixBitRange { min: 32, max: 0 },
            ipv6_bits: PrefixBitRange { min: 128, max: 0 },
        }
    }

    /// Number of stored prefixes across both families.
    pub fn len(&self) -> usize {
        self.ipv4.len() + self.ipv6.len()
    }

    /// Returns `true` if no prefixes are stored.
    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }

    /// Remove every stored prefix.
    pub fn clear(&mut self) {
        self.ipv4.clear();
        self.ipv6.clear();
        self.ipv4_bits = PrefixBitRange { min: 32, max: 0 };
        self.ipv6_bits = PrefixBitRange { min: 128, max: 0 };
    }

    /// Store `value` against the canonical (masked) form of `prefix`,
    /// replacing any previous value for the same prefix.
    pub fn set(&mut self, prefix: IpNetwork, value: V) {
        match canonical(prefix) {
            IpNetwork::V4(network) => {
                self.ipv4_bits.update(network.netmask());
                self.ipv4.insert(network, value);
            }
            IpNetwork::V6(network) => {
                self.ipv6_bits.update(network.netmask());
                self.ipv6.insert(network, value);
            }
        }
    }

    /// Exact-prefix lookup.
    pub fn get(&self, prefix: IpNetwork) -> Option<&V> {
        match canonical(prefix) {
            IpNetwork::V4(network) => self.ipv4.get(&network),
            IpNetwork::V6(network) => self.ipv6.get(&network),
        }
    }

    /// Return the value of the most specific stored prefix containing
    /// `addr`, if any. IPv4 addresses never match IPv6 prefixes and vice
    /// versa.
    pub fn get_by_addr(&self, addr: IpAddr) -> Option<&V> {
        match addr {
            IpAddr::V4(addr) => {
                let range = self.ipv4_bits;
                (range.min..=range.max).rev().find_map(|bits| {
                    let network = Ipv4Network::new_truncate(addr, bits).ok()?;
                    self.ipv4.get(&network)
                })
            }
            IpAddr::V6(addr) => {
                let range = self.ipv6_bits;
                (range.min..=range.max).rev().find_map(|bits| {
                    let network = Ipv6Network::new_truncate(addr, bits).ok()?;
                    self.ipv6.get(&network)
                })
            }
        }
    }

    /// Delete the exact prefix, leaving any more or less specific entries
    /// untouched.
    pub fn remove(&mut self, prefix: IpNetwork) -> Option<V> {
        match canonical(prefix) {
            IpNetwork::V4(network) => self.ipv4.remove(&network),
            IpNetwork::V6(network) => self.ipv6.remove(&network),
        }
    }

    /// Delete the prefix and every more-specific descendant contained
    /// within it.
    pub fn remove_range(&mut self, prefix: IpNetwork) {
        match canonical(prefix) {
            IpNetwork::V4(range) => {
                self.ipv4.retain(|stored, _| {
                    stored.netmask() < range.netmask() || !range.contains(stored.network_address())
                });
            }
            IpNetwork::V6(range) => {
                self.ipv6.retain(|stored, _| {
                    stored.netmask() < range.netmask() || !range.contains(stored.network_address())
                });
            }
        }
    }
}

fn canonical(prefix: IpNetwork) -> IpNetwork {
    match prefix {
        IpNetwork::V4(network) => {
            Ipv4Network::new_truncate(network.network_address(), network.netmask())
                .map(IpNetwork::V4)
                .unwrap_or(prefix)
        }
        IpNetwork::V6(network) => {
            Ipv6Network::new_truncate(network.network_address(), network.netmask())
                .map(IpNetwork::V6)
                .unwrap_or(prefix)
        }
    }
}

/// Observed range of prefix lengths for one family, used to bound the
/// longest-prefix search. Never shrinks; a stale upper bound only costs a
/// few extra hash probes.
#[derive(Clone, Copy, Debug)]
struct PrefixBitRange {
    min: u8,
    max: u8,
}

impl PrefixBitRange {
    fn update(&mut self, value: u8) {
        if value < self.min {
            self.min = value;
        }

        if value > self.max {
            self.max = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PrefixMap;
    use ip_network::IpNetwork;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    fn prefix(text: &str) -> IpNetwork {
        let (addr, bits) = text.split_once('/').expect("prefix literal");
        IpNetwork::new_truncate(
            addr.parse::<IpAddr>().expect("address literal"),
            bits.parse().expect("bit length"),
        )
        .expect("valid prefix")
    }

    fn addr(text: &str) -> IpAddr {
        text.parse().expect("address literal")
    }

    fn expect_contains(map: &PrefixMap<&str>, key: &str, expected: &str) {
        match map.get_by_addr(addr(key)) {
            Some(value) => assert_eq!(*value, expected, "lookup of {key}"),
            None => panic!("failed to find expected key {key}"),
        }
    }

    #[test]
    fn longest_prefix_wins_at_varying_depths() {
        let mut map = PrefixMap::new();

        map.set(prefix("1.0.0.0/8"), "a");
        map.set(prefix("1.2.0.0/16"), "b");
        map.set(prefix("1.2.3.0/24"), "c");
        map.set(prefix("1.2.3.4/32"), "d");

        // Prefixes sharing leading bytes with the above, in the other family.
        map.set(prefix("0100::/8"), "e");
        map.set(prefix("0102::/15"), "f");

        expect_contains(&map, "1.23.19.23", "a");
        expect_contains(&map, "1.2.123.2", "b");
        expect_contains(&map, "1.2.0.0", "b");
        expect_contains(&map, "1.2.3.22", "c");
        expect_contains(&map, "1.2.3.4", "d");
    }

    #[test]
    fn overwriting_a_prefix_keeps_the_latest_value() {
        let mut map = PrefixMap::new();
        map.set(prefix("1.0.0.0/8"), "a");
        map.set(prefix("0100::/8"), "e");

        map.set(prefix("1.0.0.0/8"), "g");
        map.set(prefix("0100::/8"), "h");

        expect_contains(&map, "1.23.19.23", "g");
        expect_contains(&map, "0100::", "h");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn default_route_and_edge_addresses() {
        let mut map = PrefixMap::new();

        map.set(prefix("0.0.0.0/0"), "h");
        map.set(prefix("1.2.128.0/17"), "i");
        map.set(prefix("1.2.3.4/32"), "j");
        map.set(prefix("5.6.7.8/32"), "k");

        expect_contains(&map, "22.1.24.6", "h");
        expect_contains(&map, "0.0.0.0", "h");
        expect_contains(&map, "255.255.255.255", "h");

        expect_contains(&map, "1.2.133.235", "i");
        expect_contains(&map, "1.2.128.0", "i");
        expect_contains(&map, "1.2.255.255", "i");

        expect_contains(&map, "1.2.3.4", "j");
        expect_contains(&map, "5.6.7.8", "k");
    }

    #[test]
    fn families_are_disjoint() {
        let mut map = PrefixMap::new();
        map.set(prefix("::/0"), "v6");

        assert!(map.get_by_addr(addr("1.2.3.4")).is_none());
        expect_contains(&map, "2a04:4e42::1", "v6");
    }

    #[test]
    fn remove_deletes_only_the_exact_prefix() {
        let mut map = PrefixMap::new();
        map.set(prefix("1.0.0.0/8"), "a");
        map.set(prefix("1.2.0.0/16"), "b");

        map.remove(prefix("1.2.0.0/16"));
        expect_contains(&map, "1.2.3.4", "a");
    }

    #[test]
    fn remove_range_deletes_descendants() {
        let mut map = PrefixMap::new();
        map.set(prefix("1.2.3.4/32"), "a");
        map.set(prefix("1.2.3.5/32"), "b");
        map.set(prefix("1.2.4.0/24"), "c");

        map.remove_range(prefix("1.2.3.0/24"));

        assert!(map.get_by_addr(addr("1.2.3.4")).is_none());
        assert!(map.get_by_addr(addr("1.2.3.5")).is_none());
        expect_contains(&map, "1.2.4.5", "c");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_range_includes_the_prefix_itself() {
        let mut map = PrefixMap::new();
        map.set(prefix("10.0.0.0/8"), "a");
        map.set(prefix("10.1.0.0/16"), "b");

        map.remove_range(prefix("10.0.0.0/8"));
        assert!(map.is_empty());
    }

    // Walks a single set bit across every IPv4 prefix length, checking the
    // first and last address of each block match and their neighbors do not.
    #[test]
    fn every_ipv4_bit_length_bounds_correctly() {
        let mut map = PrefixMap::new();

        for bit_len in (1..=32u8).rev() {
            let value = bit_len.to_string();
            let addr_bits = 1u32 << (32 - bit_len);

            let first = Ipv4Addr::from(addr_bits);
            let last = Ipv4Addr::from(addr_bits | (addr_bits - 1));

            map.set(
                IpNetwork::new_truncate(IpAddr::V4(first), bit_len).expect("valid prefix"),
                value.clone(),
            );

            assert_eq!(map.get_by_addr(IpAddr::V4(first)), Some(&value));
            assert_eq!(map.get_by_addr(IpAddr::V4(last)), Some(&value));

            let before = Ipv4Addr::from(addr_bits - 1);
            if map.get_by_addr(IpAddr::V4(before)) == Some(&value) {
                panic!("address {before} should not match the /{bit_len} block");
            }

            let after = Ipv4Addr::from((addr_bits | (addr_bits - 1)).wrapping_add(1));
            if map.get_by_addr(IpAddr::V4(after)) == Some(&value) {
                panic!("address {after} should not match the /{bit_len} block");
            }
        }
    }

    fn check_ipv6_pattern(base_pattern: u128, min_bit_len: u8) {
        let mut map = PrefixMap::new();

        for bit_len in (min_bit_len..=128u8).rev() {
            let value = bit_len.to_string();
            let addr_bits = base_pattern << (128 - bit_len);
            let block_mask = if bit_len == 0 {
                u128::MAX
            } else {
                (1u128 << (128 - bit_len)) - 1
            };

            let first = Ipv6Addr::from(addr_bits);
            let last = Ipv6Addr::from(addr_bits | block_mask);

            map.set(
                IpNetwork::new_truncate(IpAddr::V6(first), bit_len).expect("valid prefix"),
                value.clone(),
            );

            assert_eq!(map.get_by_addr(IpAddr::V6(first)), Some(&value));
            assert_eq!(map.get_by_addr(IpAddr::V6(last)), Some(&value));

            let before = Ipv6Addr::from(addr_bits.wrapping_sub(1));
            if map.get_by_addr(IpAddr::V6(before)) == Some(&value) {
                panic!("address {before} should not match the /{bit_len} block");
            }

            let after = Ipv6Addr::from((addr_bits | block_mask).wrapping_add(1));
            if map.get_by_addr(IpAddr::V6(after)) == Some(&value) {
                panic!("address {after} should not match the /{bit_len} block");
            }
        }
    }

    #[test]
    fn every_ipv6_bit_length_bounds_correctly() {
        check_ipv6_pattern(0b1, 1);
    }

    // Same walk with a wider bit pattern, so the block boundaries are not
    // aligned to a single set bit.
    #[test]
    fn ipv6_bit_lengths_with_unaligned_pattern() {
        check_ipv6_pattern(0b101, 3);
    }
}
