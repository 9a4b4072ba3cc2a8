//! Probe catalog and destination endpoints.

use super::body::parse_json_body;
use super::error::ApiError;
use crate::services::probe_collection::probe_by_id;
use crate::state::ApplicationState;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use ip_network::IpNetwork;
use rwatch_atlas::{GeoPoint, Probe};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProbeData {
    id: u64,
    ipv4: Option<String>,
    ipv6: Option<String>,
    country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    asn4: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    asn6: Option<u32>,
    location: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_used: Option<i64>,
}

impl ProbeData {
    fn from_probe(probe: &Probe, last_used: Option<i64>) -> Self {
        Self {
            id: probe.id,
            ipv4: probe.ipv4.map(|ip| ip.to_string()),
            ipv6: probe.ipv6.map(|ip| ip.to_string()),
            country_code: probe.country_code.clone(),
            asn4: probe.asn4,
            asn6: probe.asn6,
            location: probe.geometry.clone(),
            last_used,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProbeSearchRequest {
    destination_ip: String,
    #[serde(default)]
    filter_asns: Vec<u32>,
    #[serde(default)]
    filter_prefix: Option<String>,
}

fn prefix_contains(prefix: &IpNetwork, addr: IpAddr) -> bool {
    match (prefix, addr) {
        (IpNetwork::V4(network), IpAddr::V4(addr)) => network.contains(addr),
        (IpNetwork::V6(network), IpAddr::V6(addr)) => network.contains(addr),
        _ => false,
    }
}

fn probe_matches(probe: &Probe, filter_asns: &[u32], filter_prefix: Option<&IpNetwork>) -> bool {
    if !filter_asns.is_empty() {
        let asn_matches = probe
            .asn4
            .into_iter()
            .chain(probe.asn6)
            .any(|asn| filter_asns.contains(&asn));
        if !asn_matches {
            return false;
        }
    }

    if let Some(prefix) = filter_prefix {
        let prefix_matches = probe
            .ipv4
            .into_iter()
            .chain(probe.ipv6)
            .any(|ip| prefix_contains(prefix, ip));
        if !prefix_matches {
            return false;
        }
    }

    true
}

/// `POST /api/probes`: probes recently observed hitting a destination,
/// optionally filtered by origin AS or address prefix.
pub async fn get_probes(
    State(state): State<Arc<ApplicationState>>,
    body: Bytes,
) -> Result<Json<Vec<ProbeData>>, ApiError> {
    let request: ProbeSearchRequest = parse_json_body(&body)?;

    let destination: IpAddr = request
        .destination_ip
        .parse()
        .map_err(|_| ApiError::InvalidRequest("Could not read destination IP\n".to_string()))?;

    let filter_prefix = match request.filter_prefix.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<IpNetwork>().map_err(|_| {
            ApiError::InvalidRequest("Could not read filter prefix\n".to_string())
        })?),
    };

    let usages = state.probe_data.read().usage_for_destination(destination);

    // Catalog misses fall back to a per-probe fetch, so no lock may be held
    // across this loop.
    let mut probes = Vec::with_capacity(usages.len());
    for usage in usages {
        let Some(probe) = probe_by_id(&state, usage.probe_id).await else {
            continue;
        };

        if probe_matches(&probe, &request.filter_asns, filter_prefix.as_ref()) {
            probes.push(ProbeData::from_probe(&probe, Some(usage.last_used)));
        }
    }

    Ok(Json(probes))
}

/// `GET /api/probes/list`: the whole catalog.
pub async fn get_probes_list(State(state): State<Arc<ApplicationState>>) -> Json<Vec<ProbeData>> {
    let probe_data = state.probe_data.read();

    let probes = probe_data
        .probes()
        .map(|probe| ProbeData::from_probe(probe, None))
        .collect();

    Json(probes)
}

#[derive(Serialize)]
pub(crate) struct DestinationData {
    ipv4: Option<String>,
    ipv6: Option<String>,
}

/// `GET /api/destinations`: every destination with stored route data, one
/// entry per address.
pub async fn get_destinations(
    State(state): State<Arc<ApplicationState>>,
) -> Json<Vec<DestinationData>> {
    let destinations = state
        .traceroute_data
        .read()
        .destinations()
        .into_iter()
        .map(|addr| match addr {
            IpAddr::V4(v4) => DestinationData { ipv4: Some(v4.to_string()), ipv6: None },
            IpAddr::V6(v6) => DestinationData { ipv4: None, ipv6: Some(v6.to_string()) },
        })
        .collect();

    Json(destinations)
}
