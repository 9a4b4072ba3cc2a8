//! Route-graph projections: the full and cleaned JSON views plus the
//! raw-results download.

use super::body::parse_json_body;
use super::error::ApiError;
use crate::state::ApplicationState;
use crate::store::{DirectedEdge, Edge, NodeId, RouteData, TimeRange};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use fxhash::FxHashMap;
use rwatch_atlas::results_url;
use rwatch_config::MIN_CLEAN_EDGE_WEIGHT;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TracerouteRequest {
    probe_id: u64,
    destination_ip: String,
}

impl TracerouteRequest {
    fn destination(&self) -> Result<IpAddr, ApiError> {
        self.destination_ip
            .parse()
            .map_err(|_| ApiError::InvalidRequest("Could not read destination IP\n".to_string()))
    }
}

#[derive(Serialize, Clone, PartialEq, Eq, Debug)]
struct NodeIdData {
    ip: String,
    #[serde(rename = "timeSinceKnown")]
    time_since_known: u32,
}

impl From<&NodeId> for NodeIdData {
    fn from(id: &NodeId) -> Self {
        Self {
            ip: id.ip.to_string(),
            time_since_known: id.timeouts_since_known,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeData {
    id: NodeIdData,
    #[serde(skip_serializing_if = "Option::is_none")]
    asn: Option<u32>,
    average_rtt: f64,
    last_used: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EdgeData {
    start: NodeIdData,
    end: NodeIdData,
    outbound_coverage: f64,
    total_traffic_coverage: f64,
    last_used: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RouteGraphResponse {
    probe_ips: Vec<String>,
    nodes: Vec<NodeData>,
    edges: Vec<EdgeData>,
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// An edge survives the cleaned view when it carries at least the minimum
/// weight divided across the source's outbound fan, so heavily-branching
/// nodes are allowed proportionally thinner edges.
fn passes_clean_weight(outbound_coverage: f64, outbound_fan: usize, min_weight: f64) -> bool {
    outbound_coverage >= min_weight / outbound_fan.max(1) as f64
}

fn project_nodes<'a>(
    state: &ApplicationState,
    nodes: impl Iterator<Item = (&'a NodeId, &'a crate::store::Node)>,
) -> Vec<NodeData> {
    nodes
        .map(|(id, node)| {
            // Synthetic timeout vertices have no meaningful origin network.
            let asn = if id.is_timeout() { None } else { state.lookup_asn(id.ip) };

            NodeData {
                id: id.into(),
                asn,
                average_rtt: finite_or_zero(node.average_rtt().unwrap_or(0.0)),
                last_used: node.last_used(),
            }
        })
        .collect()
}

fn project_edge(edge_key: &DirectedEdge, edge: &Edge, outbound_total: f64, route_total: f64) -> EdgeData {
    EdgeData {
        start: (&edge_key.start).into(),
        end: (&edge_key.stop).into(),
        outbound_coverage: finite_or_zero(edge.usage() / outbound_total),
        total_traffic_coverage: finite_or_zero(edge.net_usage() / route_total),
        last_used: edge.last_used(),
    }
}

fn with_route<T>(
    state: &ApplicationState,
    request: &TracerouteRequest,
    project: impl FnOnce(&RouteData) -> T,
) -> Result<T, ApiError> {
    let destination = request.destination()?;

    let store = state.traceroute_data.read();
    let route = store
        .route(request.probe_id, destination)
        .ok_or(ApiError::RoutePairNotFound)?;

    if route.is_empty() {
        return Err(ApiError::NoRouteData);
    }

    Ok(project(route))
}

/// `POST /api/traceroute/full`: every vertex and edge, timeout columns
/// included.
pub async fn get_traceroute_full(
    State(state): State<Arc<ApplicationState>>,
    body: Bytes,
) -> Result<Json<RouteGraphResponse>, ApiError> {
    let request: TracerouteRequest = parse_json_body(&body)?;

    let response = with_route(&state, &request, |route| {
        let route_total = route.route_usage();

        let edges = route
            .edges()
            .map(|(key, edge)| {
                let outbound_total = route
                    .node(&key.start)
                    .map(|node| node.total_outbound_usage())
                    .unwrap_or(0.0);
                project_edge(key, edge, outbound_total, route_total)
            })
            .collect();

        RouteGraphResponse {
            probe_ips: route.probe_ips().map(|(ip, _)| ip.to_string()).collect(),
            nodes: project_nodes(&state, route.nodes()),
            edges,
        }
    })?;

    Ok(Json(response))
}

/// `POST /api/traceroute/clean`: only real routers, with low-weight edges
/// pruned per source node.
pub async fn get_traceroute_clean(
    State(state): State<Arc<ApplicationState>>,
    body: Bytes,
) -> Result<Json<RouteGraphResponse>, ApiError> {
    let request: TracerouteRequest = parse_json_body(&body)?;

    let response = with_route(&state, &request, |route| {
        let route_total = route.route_usage();

        let mut outbound_edge_counts: FxHashMap<NodeId, usize> = FxHashMap::default();
        for (key, _) in route.clean_edges() {
            *outbound_edge_counts.entry(key.start).or_default() += 1;
        }

        let edges = route
            .clean_edges()
            .filter_map(|(key, edge)| {
                let outbound_total = route
                    .node(&key.start)
                    .map(|node| node.total_clean_outbound_usage())
                    .unwrap_or(0.0);
                let projected = project_edge(key, edge, outbound_total, route_total);

                let fan = outbound_edge_counts.get(&key.start).copied().unwrap_or(1);
                passes_clean_weight(projected.outbound_coverage, fan, *MIN_CLEAN_EDGE_WEIGHT)
                    .then_some(projected)
            })
            .collect();

        RouteGraphResponse {
            probe_ips: route.probe_ips().map(|(ip, _)| ip.to_string()).collect(),
            nodes: project_nodes(&state, route.nodes().filter(|(id, _)| !id.is_timeout())),
            edges,
        }
    })?;

    Ok(Json(response))
}

/// `POST /api/traceroute/raw`: hand back the upstream results this route
/// was built from. A single-source route redirects straight to the
/// platform; multi-source routes stream the concatenated responses.
pub async fn get_traceroute_raw(
    State(state): State<Arc<ApplicationState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: TracerouteRequest = parse_json_body(&body)?;

    // Snapshot the contributing measurements, then release the lock before
    // any upstream I/O.
    let ranges: Vec<(u64, TimeRange)> =
        with_route(&state, &request, |route| route.metrics().iter().collect())?;

    if ranges.is_empty() {
        return Err(ApiError::NoRouteData);
    }

    let urls: Vec<String> = ranges
        .iter()
        .map(|(measurement_id, range)| {
            results_url(
                *measurement_id,
                Some(range.start),
                Some(range.end),
                Some(request.probe_id),
            )
        })
        .collect();

    if let [url] = urls.as_slice() {
        return Ok((
            StatusCode::FOUND,
            [(header::LOCATION, url.clone())],
        )
            .into_response());
    }

    let (chunk_tx, chunk_rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(16);

    tokio::spawn(async move {
        for url in urls {
            let response = match reqwest::get(&url).await.and_then(|r| r.error_for_status()) {
                Ok(response) => response,
                Err(e) => {
                    warn!("Raw download of {url} failed: {e}");
                    continue;
                }
            };

            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => Ok(chunk),
                    Err(e) => {
                        warn!("Raw download of {url} aborted mid-stream: {e}");
                        break;
                    }
                };

                if chunk_tx.send(chunk).await.is_err() {
                    return;
                }
            }
        }
    });

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(ReceiverStream::new(chunk_rx)),
    )
        .into_response())
}
