//! Probe catalog client: parallel pagination over the platform's probe
//! listing, plus single-probe lookup for cache misses.

use crate::AtlasError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::warn;

const PROBES_URL: &str = "https://atlas.ripe.net/api/v2/probes/";
const PROBE_PAGE_SIZE: u64 = 100;
const PROBE_CHANNEL_BUFFER: usize = 64;

/// Status id for probes currently connected to the platform.
const STATUS_CONNECTED: u64 = 1;

/// GeoJSON point attached to a probe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Geometry type, in practice always "Point".
    #[serde(rename = "type")]
    pub kind: String,
    /// `[longitude, latitude]`.
    pub coordinates: Vec<f64>,
}

/// A connected probe from the platform catalog.
#[derive(Clone, Debug)]
pub struct Probe {
    /// Platform-wide probe identifier.
    pub id: u64,
    /// IPv4 address, when the probe has one.
    pub ipv4: Option<IpAddr>,
    /// IPv6 address, when the probe has one.
    pub ipv6: Option<IpAddr>,
    /// Two-letter country code.
    pub country_code: Option<String>,
    /// ASN of the IPv4 address.
    pub asn4: Option<u32>,
    /// ASN of the IPv6 address.
    pub asn6: Option<u32>,
    /// Approximate location.
    pub geometry: Option<GeoPoint>,
}

#[derive(Deserialize)]
struct ProbePage {
    count: u64,
    #[serde(default)]
    results: Vec<RawProbe>,
}

#[derive(Deserialize)]
struct RawProbe {
    id: u64,
    address_v4: Option<String>,
    address_v6: Option<String>,
    asn_v4: Option<u32>,
    asn_v6: Option<u32>,
    country_code: Option<String>,
    geometry: Option<GeoPoint>,
    status: Option<RawStatus>,
}

#[derive(Deserialize)]
struct RawStatus {
    id: u64,
}

impl RawProbe {
    fn is_connected(&self) -> bool {
        self.status.as_ref().map(|status| status.id) == Some(STATUS_CONNECTED)
    }

    /// Convert to the catalog form. Fails when a present address does not
    /// parse, which disqualifies the probe rather than storing bad data.
    fn parse(self) -> Result<Probe, std::net::AddrParseError> {
        let parse_addr = |raw: Option<String>| -> Result<Option<IpAddr>, std::net::AddrParseError> {
            match raw.as_deref() {
                None | Some("") => Ok(None),
                Some(raw) => raw.parse().map(Some),
            }
        };

        Ok(Probe {
            id: self.id,
            ipv4: parse_addr(self.address_v4)?,
            ipv6: parse_addr(self.address_v6)?,
            country_code: self.country_code,
            asn4: self.asn_v4,
            asn6: self.asn_v6,
            geometry: self.geometry,
        })
    }
}

async fn fetch_page(client: &reqwest::Client, page: u64) -> Result<ProbePage, AtlasError> {
    Ok(client
        .get(PROBES_URL)
        .query(&[("format", "json"), ("page", page.to_string().as_str())])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?)
}

/// Fetch the full probe catalog. Page ranges are divided across parallel
/// workers; probes arrive on the returned bounded channel as pages complete
/// and the channel closes when every worker finishes. Disconnected and
/// unparseable probes are dropped.
pub async fn fetch_all_probes() -> Result<mpsc::Receiver<Probe>, AtlasError> {
    let client = reqwest::Client::new();

    let first_page = fetch_page(&client, 1).await?;
    let total_pages = first_page.count.div_ceil(PROBE_PAGE_SIZE).max(1);

    let workers = std::thread::available_parallelism()
        .map(|n| n.get() as u64)
        .unwrap_or(4)
        .min(total_pages);
    let pages_per_worker = total_pages.div_ceil(workers);

    let (probe_tx, probe_rx) = mpsc::channel(PROBE_CHANNEL_BUFFER);

    for worker in 0..workers {
        let first = worker * pages_per_worker + 1;
        let last = ((worker + 1) * pages_per_worker).min(total_pages);
        let client = client.clone();
        let probe_tx = probe_tx.clone();

        tokio::spawn(async move {
            for page_number in first..=last {
                let page = match fetch_page(&client, page_number).await {
                    Ok(page) => page,
                    Err(e) => {
                        warn!("Failed to fetch probe page {page_number}: {e}");
                        continue;
                    }
                };

                for raw in page.results {
                    if !raw.is_connected() {
                        continue;
                    }

                    let id = raw.id;
                    match raw.parse() {
                        Ok(probe) => {
                            if probe_tx.send(probe).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Could not parse probe {id}: {e}"),
                    }
                }
            }
        });
    }

    Ok(probe_rx)
}

/// Fetch a single probe by id, returning `None` when the platform does not
/// know it or it is not connected.
pub async fn fetch_probe_by_id(probe_id: u64) -> Result<Option<Probe>, AtlasError> {
    let client = reqwest::Client::new();

    let page: ProbePage = client
        .get(PROBES_URL)
        .query(&[("format", "json"), ("pk", probe_id.to_string().as_str())])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    for raw in page.results {
        if !raw.is_connected() {
            continue;
        }

        let id = raw.id;
        match raw.parse() {
            Ok(probe) => return Ok(Some(probe)),
            Err(e) => warn!("Could not parse probe {id}: {e}"),
        }
    }

    Ok(None)
}
