use crate::filters::{is_global_unicast, is_ipv4_mapped, is_private};
use crate::prefix_map::PrefixMap;
use flate2::read::GzDecoder;
use ip_network::IpNetwork;
use std::io::{BufRead, BufReader};
use std::net::IpAddr;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

const CAIDA_PREFIX2AS_IPV4: &str =
    "https://publicdata.caida.org/datasets/routing/routeviews-prefix2as/";
const CAIDA_PREFIX2AS_IPV6: &str =
    "https://publicdata.caida.org/datasets/routing/routeviews6-prefix2as/";
const PREFIX2AS_CREATION_LOG: &str = "pfx2as-creation.log";

/// Errors from refreshing the prefix-to-ASN mapping. A failed refresh never
/// disturbs the previously loaded map.
#[derive(Error, Debug)]
pub enum RefreshError {
    /// The upstream dataset could not be fetched.
    #[error("upstream fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    /// The gzip stream could not be read.
    #[error("failed to read dataset: {0}")]
    Read(#[from] std::io::Error),
    /// The dataset index had no usable entry.
    #[error("unable to locate the most recent prefix-to-AS dataset")]
    MissingDataset,
    /// A dataset line did not match the `addr \t len \t asn` layout.
    #[error("malformed dataset line: {0:?}")]
    MalformedLine(String),
}

/// Longest-prefix mapping from IP address to origin ASN, populated from the
/// routeviews prefix-to-AS datasets for both address families.
pub struct IpToAsn {
    asn_map: PrefixMap<u32>,
    last_refresh: Instant,
}

impl IpToAsn {
    /// Fetch both family datasets and build the initial mapping.
    pub async fn create() -> Result<Self, RefreshError> {
        let mut ip_to_asn = Self {
            asn_map: PrefixMap::new(),
            last_refresh: Instant::now(),
        };
        ip_to_asn.refresh().await?;
        Ok(ip_to_asn)
    }

    /// When the mapping was last successfully rebuilt (or first attempted).
    pub fn last_refresh(&self) -> Instant {
        self.last_refresh
    }

    /// Record a refresh attempt that kept the current mapping, so the
    /// scheduler waits a full period before retrying.
    pub fn mark_refresh_attempt(&mut self) {
        self.last_refresh = Instant::now();
    }

    /// Number of stored prefixes.
    pub fn len(&self) -> usize {
        self.asn_map.len()
    }

    /// Returns `true` when no prefixes are loaded.
    pub fn is_empty(&self) -> bool {
        self.asn_map.is_empty()
    }

    /// Origin ASN of the most specific prefix covering `addr`.
    pub fn get(&self, addr: IpAddr) -> Option<u32> {
        self.asn_map.get_by_addr(addr).copied()
    }

    /// Re-fetch both datasets. The new mapping is built to the side and only
    /// swapped in when every line parsed, so a mid-stream failure leaves the
    /// current mapping intact.
    pub async fn refresh(&mut self) -> Result<(), RefreshError> {
        self.last_refresh = Instant::now();

        let mut fresh = PrefixMap::new();
        refresh_from_source(CAIDA_PREFIX2AS_IPV4, &mut fresh).await?;
        refresh_from_source(CAIDA_PREFIX2AS_IPV6, &mut fresh).await?;

        info!("Loaded {} prefix-to-AS entries", fresh.len());
        self.asn_map = fresh;
        Ok(())
    }
}

async fn refresh_from_source(
    search_dir: &str,
    map: &mut PrefixMap<u32>,
) -> Result<(), RefreshError> {
    let dataset_url = latest_dataset_url(search_dir).await?;
    refresh_from_url(&dataset_url, map).await
}

/// The creation log lists one dataset per line; the final TAB-separated
/// column of the last non-empty line names the most recent file.
async fn latest_dataset_url(search_dir: &str) -> Result<String, RefreshError> {
    let index = reqwest::get(format!("{search_dir}{PREFIX2AS_CREATION_LOG}"))
        .await?
        .error_for_status()?
        .text()
        .await?;

    let last_line = index
        .lines()
        .filter(|line| !line.trim().is_empty())
        .next_back()
        .ok_or(RefreshError::MissingDataset)?;

    let (_, file_name) = last_line
        .rsplit_once('\t')
        .ok_or(RefreshError::MissingDataset)?;

    Ok(format!("{search_dir}{file_name}"))
}

async fn refresh_from_url(url: &str, map: &mut PrefixMap<u32>) -> Result<(), RefreshError> {
    let compressed = reqwest::get(url)
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    let reader = BufReader::new(GzDecoder::new(compressed.as_ref()));

    for line in reader.lines() {
        let line = line?;
        let Some((prefix, asn)) = parse_asn_line(&line) else {
            warn!("Failed to parse prefix-to-AS line {line:?}");
            return Err(RefreshError::MalformedLine(line));
        };

        if !should_include_prefix(prefix, asn) {
            continue;
        }

        // Drop any children this broader prefix now covers.
        map.remove_range(prefix);

        // If a covering prefix already yields the same ASN, this entry would
        // be redundant shadow data.
        let network_addr = match prefix {
            IpNetwork::V4(network) => IpAddr::V4(network.network_address()),
            IpNetwork::V6(network) => IpAddr::V6(network.network_address()),
        };
        if map.get_by_addr(network_addr) != Some(&asn) {
            map.set(prefix, asn);
        }
    }

    Ok(())
}

/// Parses one dataset line of `address \t prefix-length \t asn-spec`, where
/// `asn-spec` may be a `,`- or `_`-joined list of which only the first entry
/// matters.
fn parse_asn_line(input: &str) -> Option<(IpNetwork, u32)> {
    let mut segments = input.splitn(3, '\t');
    let addr: IpAddr = segments.next()?.parse().ok()?;
    let bits: u8 = segments.next()?.parse().ok()?;

    let asn_spec = segments.next()?;
    let first_asn = asn_spec
        .split(|c| c == ',' || c == '_')
        .next()
        .unwrap_or(asn_spec);
    let asn: u32 = first_asn.parse().ok()?;

    let prefix = IpNetwork::new_truncate(addr, bits).ok()?;
    Some((prefix, asn))
}

/// A prefix is included iff it covers public global-unicast space and is not
/// more specific than a /24 (IPv4) or /48 (IPv6), and its ASN is globally
/// assigned.
fn should_include_prefix(prefix: IpNetwork, asn: u32) -> bool {
    let (addr, too_specific) = match prefix {
        IpNetwork::V4(network) => (IpAddr::V4(network.network_address()), network.netmask() > 24),
        IpNetwork::V6(network) => (IpAddr::V6(network.network_address()), network.netmask() > 48),
    };

    is_global_unicast(addr)
        && !is_ipv4_mapped(addr)
        && !is_private(addr)
        && !too_specific
        && is_public_asn(asn)
}

/// Inclusive ranges of ASN values reserved for documentation, private use,
/// or protocol transition. Unallocated ranges are not listed since they may
/// be assigned later. Ascending and non-overlapping.
const RESERVED_ASN_RANGES: [(u32, u32); 9] = [
    (0, 0),                         // Reserved (RFC 7607)
    (23456, 23456),                 // 16-to-32-bit transition AS (RFC 6793)
    (64496, 64511),                 // Documentation and sample code (RFC 5398)
    (64512, 65534),                 // Private use (RFC 6996)
    (65535, 65535),                 // Reserved (RFC 7300)
    (65536, 65551),                 // Documentation and sample code (RFC 5398)
    (65552, 131071),                // Reserved
    (4200000000, 4294967294),       // Private use (RFC 6996)
    (4294967295, 4294967295),       // Reserved (RFC 7300)
];

fn is_public_asn(asn: u32) -> bool {
    for (min, max) in RESERVED_ASN_RANGES {
        if asn < min {
            // Ranges are ascending; everything after starts above the ASN.
            break;
        }

        if asn <= max {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::{is_public_asn, parse_asn_line, should_include_prefix, IpToAsn};
    use ip_network::IpNetwork;
    use std::net::IpAddr;

    fn prefix(text: &str) -> IpNetwork {
        let (addr, bits) = text.split_once('/').expect("prefix literal");
        IpNetwork::new_truncate(
            addr.parse::<IpAddr>().expect("address literal"),
            bits.parse().expect("bit length"),
        )
        .expect("valid prefix")
    }

    #[test]
    fn dataset_lines_parse() {
        assert_eq!(
            parse_asn_line("151.101.0.0\t16\t54113"),
            Some((prefix("151.101.0.0/16"), 54113))
        );

        // Multi-origin specs keep only the first AS.
        assert_eq!(
            parse_asn_line("1.2.0.0\t16\t4808,17775"),
            Some((prefix("1.2.0.0/16"), 4808))
        );
        assert_eq!(
            parse_asn_line("2a04:4e42::\t32\t54113_64512"),
            Some((prefix("2a04:4e42::/32"), 54113))
        );
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(parse_asn_line("151.101.0.0 16 54113").is_none());
        assert!(parse_asn_line("151.101.0.0\t16").is_none());
        assert!(parse_asn_line("151.101.0.0\tsixteen\t54113").is_none());
        assert!(parse_asn_line("not-an-ip\t16\t54113").is_none());
        assert!(parse_asn_line("151.101.0.0\t16\tAS54113").is_none());
    }

    #[test]
    fn reserved_asn_ranges_are_rejected() {
        for reserved in [0, 23456, 64496, 64500, 64512, 65534, 65535, 65536, 131071, 4200000000, 4294967295] {
            assert!(!is_public_asn(reserved), "{reserved}");
        }

        for public in [1, 13335, 54113, 23455, 23457, 64495, 131072, 397197] {
            assert!(is_public_asn(public), "{public}");
        }
    }

    #[test]
    fn inclusion_filter_enforces_every_condition() {
        assert!(should_include_prefix(prefix("151.101.0.0/16"), 54113));
        assert!(should_include_prefix(prefix("2a04:4e42::/32"), 54113));

        // Too specific for each family.
        assert!(!should_include_prefix(prefix("151.101.0.0/25"), 54113));
        assert!(!should_include_prefix(prefix("2a04:4e42::/49"), 54113));
        assert!(should_include_prefix(prefix("151.101.0.0/24"), 54113));
        assert!(should_include_prefix(prefix("2a04:4e42::/48"), 54113));

        // Non-global or private space.
        assert!(!should_include_prefix(prefix("10.0.0.0/8"), 54113));
        assert!(!should_include_prefix(prefix("224.0.0.0/4"), 54113));
        assert!(!should_include_prefix(prefix("fc00::/7"), 54113));
        assert!(!should_include_prefix(prefix("::ffff:1.2.3.0/120"), 54113));

        // Reserved origin AS.
        assert!(!should_include_prefix(prefix("151.101.0.0/16"), 64512));
    }

    // Network smoke tests against the live dataset; run with
    // `cargo test -- --ignored` when upstream access is available.

    #[tokio::test]
    #[ignore = "fetches the live routeviews dataset"]
    async fn known_anycast_prefixes_resolve() {
        let asn_map = IpToAsn::create().await.expect("refresh should succeed");
        assert!(asn_map.len() > 0, "dataset should not be empty");

        const EXPECTED_ASN: u32 = 54113;
        let known_ips = ["151.101.0.1", "2a04:4e42::1", "199.232.0.1", "2a04:4e41::1"];

        let correct = known_ips
            .iter()
            .filter(|ip| {
                let addr = ip.parse().expect("address literal");
                asn_map.get(addr) == Some(EXPECTED_ASN)
            })
            .count();

        assert!(
            correct >= known_ips.len() * 2 / 3,
            "only {correct}/{} anycast addresses resolved to AS{EXPECTED_ASN}",
            known_ips.len()
        );
    }

    #[tokio::test]
    #[ignore = "fetches the live routeviews dataset"]
    async fn root_dns_servers_resolve() {
        let asn_map = IpToAsn::create().await.expect("refresh should succeed");
        assert!(asn_map.len() > 0, "dataset should not be empty");

        // Every root DNS server except j-root, which spans several ASes.
        let root_servers: [(&str, u32); 24] = [
            ("198.41.0.4", 397197),
            ("2001:503:ba3e::2:30", 397197),
            ("199.9.14.201", 394353),
            ("2001:500:200::b", 394353),
            ("192.33.4.12", 2149),
            ("2001:500:2::c", 2149),
            ("199.7.91.13", 10886),
            ("2001:500:2d::d", 10886),
            ("192.203.230.10", 21556),
            ("2001:500:a8::e", 21556),
            ("192.5.5.241", 3557),
            ("2001:500:2f::f", 3557),
            ("192.112.36.4", 5927),
            ("2001:500:12::d0d", 5927),
            ("198.97.190.53", 1508),
            ("2001:500:1::53", 1508),
            ("192.36.148.17", 29216),
            ("2001:7fe::53", 29216),
            ("193.0.14.129", 25152),
            ("2001:7fd::1", 25152),
            ("199.7.83.42", 20144),
            ("2001:500:9f::42", 20144),
            ("202.12.27.33", 7500),
            ("2001:dc3::35", 7500),
        ];

        let correct = root_servers
            .iter()
            .filter(|(ip, asn)| {
                let addr = ip.parse().expect("address literal");
                asn_map.get(addr) == Some(*asn)
            })
            .count();

        assert!(
            correct >= root_servers.len() * 2 / 3,
            "only {correct}/{} root DNS addresses resolved correctly",
            root_servers.len()
        );
    }
}
