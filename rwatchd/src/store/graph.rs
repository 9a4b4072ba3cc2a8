//! The per-route traceroute graph.
//!
//! Every (probe, destination) pair owns a directed multigraph of the hops
//! observed between them. Nodes and edges carry moving-window statistics so
//! the REST projections can weight paths by recent usage, and everything is
//! keyed rather than referenced so eviction is a plain filter over the maps.

use super::metrics::RouteUsageMetrics;
use fxhash::{FxHashMap, FxHashSet};
use rwatch_utils::moving_stats::{MovingAverage, MovingSummation};
use rwatch_atlas::{TraceHop, TraceReply, TracerouteResult};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// A vertex of the route graph. A positive `timeouts_since_known` marks a
/// synthetic node standing for a run of unresponsive hops downstream of the
/// named router, which preserves path length without collapsing distinct
/// timeout columns into one vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    /// Address of the router, or of the closest known ancestor for a
    /// synthetic timeout node.
    pub ip: IpAddr,
    /// How many consecutive unresponsive hops separate this vertex from the
    /// known router. Zero for real routers.
    pub timeouts_since_known: u32,
}

impl NodeId {
    fn known(ip: IpAddr) -> Self {
        Self { ip, timeouts_since_known: 0 }
    }

    fn next_timeout(self) -> Self {
        Self {
            ip: self.ip,
            timeouts_since_known: self.timeouts_since_known + 1,
        }
    }

    /// True for synthetic timeout vertices.
    pub fn is_timeout(&self) -> bool {
        self.timeouts_since_known > 0
    }
}

/// Directed edge key between two vertices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DirectedEdge {
    /// Source vertex.
    pub start: NodeId,
    /// Target vertex.
    pub stop: NodeId,
}

/// Statistics attached to one vertex.
#[derive(Clone, Debug)]
pub struct Node {
    average_rtt: MovingAverage,
    last_used: i64,
    total_outbound_usage: MovingSummation,
    total_clean_outbound_usage: MovingSummation,
    total_usage: MovingSummation,
}

impl Node {
    fn new(period: Duration) -> Self {
        Self {
            average_rtt: MovingAverage::new(period),
            last_used: 0,
            total_outbound_usage: MovingSummation::new(period),
            total_clean_outbound_usage: MovingSummation::new(period),
            total_usage: MovingSummation::new(period),
        }
    }

    /// Mean observed RTT within the window, if any samples remain.
    pub fn average_rtt(&self) -> Option<f64> {
        self.average_rtt.average()
    }

    /// Unix timestamp of the most recent observation.
    pub fn last_used(&self) -> i64 {
        self.last_used
    }

    /// Number of results that traversed this vertex within the window.
    pub fn total_usage(&self) -> f64 {
        self.total_usage.sum()
    }

    /// Emitted edge observations from this vertex within the window.
    pub fn total_outbound_usage(&self) -> f64 {
        self.total_outbound_usage.sum()
    }

    /// As [`Node::total_outbound_usage`], counting only edges between two
    /// non-timeout vertices.
    pub fn total_clean_outbound_usage(&self) -> f64 {
        self.total_clean_outbound_usage.sum()
    }

    fn align(&mut self, now: i64) {
        self.average_rtt.increment_upper_bound(now);
        self.total_outbound_usage.increment_upper_bound(now);
        self.total_clean_outbound_usage.increment_upper_bound(now);
        self.total_usage.increment_upper_bound(now);
    }
}

/// Statistics attached to one directed edge.
#[derive(Clone, Debug)]
pub struct Edge {
    usage: MovingSummation,
    net_usage: MovingSummation,
    last_used: i64,
}

impl Edge {
    fn new(period: Duration) -> Self {
        Self {
            usage: MovingSummation::new(period),
            net_usage: MovingSummation::new(period),
            last_used: 0,
        }
    }

    /// Unix timestamp of the most recent traversal.
    pub fn last_used(&self) -> i64 {
        self.last_used
    }

    /// Raw traversal count within the window.
    pub fn usage(&self) -> f64 {
        self.usage.sum()
    }

    /// Load-split traversal weight within the window: each observation
    /// contributes `1 / |next layer|`.
    pub fn net_usage(&self) -> f64 {
        self.net_usage.sum()
    }

    fn observe(&mut self, split: f64, timestamp: i64) {
        self.last_used = self.last_used.max(timestamp);
        self.usage.increment_upper_bound(timestamp);
        self.usage.append(1.0, timestamp);
        self.net_usage.increment_upper_bound(timestamp);
        self.net_usage.append(split, timestamp);
    }

    fn align(&mut self, now: i64) {
        self.usage.increment_upper_bound(now);
        self.net_usage.increment_upper_bound(now);
    }
}

/// A reply that survived error filtering.
enum CleanReply {
    Known { ip: IpAddr, rtt: f64 },
    Timeout,
}

/// The evolving graph for one (probe, destination) pair.
pub struct RouteData {
    period: Duration,
    probe_ips: FxHashMap<IpAddr, i64>,
    route_usage: MovingSummation,
    nodes: FxHashMap<NodeId, Node>,
    edges: FxHashMap<DirectedEdge, Edge>,
    clean_edges: FxHashMap<DirectedEdge, Edge>,
    metrics: RouteUsageMetrics,
}

impl RouteData {
    fn new(period: Duration) -> Self {
        Self {
            period,
            probe_ips: FxHashMap::default(),
            route_usage: MovingSummation::new(period),
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            clean_edges: FxHashMap::default(),
            metrics: RouteUsageMetrics::default(),
        }
    }

    /// Source addresses observed for this route, with last-seen times.
    pub fn probe_ips(&self) -> impl Iterator<Item = (IpAddr, i64)> + '_ {
        self.probe_ips.iter().map(|(ip, seen)| (*ip, *seen))
    }

    /// Total results ingested within the window.
    pub fn route_usage(&self) -> f64 {
        self.route_usage.sum()
    }

    /// All vertices.
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Look up one vertex.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All edges, timeout vertices included.
    pub fn edges(&self) -> impl Iterator<Item = (&DirectedEdge, &Edge)> {
        self.edges.iter()
    }

    /// Edges whose endpoints are both real routers.
    pub fn clean_edges(&self) -> impl Iterator<Item = (&DirectedEdge, &Edge)> {
        self.clean_edges.iter()
    }

    /// Contributing measurements and their time ranges.
    pub fn metrics(&self) -> &RouteUsageMetrics {
        &self.metrics
    }

    /// True when no error-free result has been ingested (or everything has
    /// been evicted since).
    pub fn is_empty(&self) -> bool {
        self.probe_ips.is_empty()
    }

    fn get_or_create_node(&mut self, id: NodeId) -> &mut Node {
        let period = self.period;
        self.nodes.entry(id).or_insert_with(|| Node::new(period))
    }

    /// Merge one traceroute result into the graph.
    fn append_result(&mut self, result: &TracerouteResult) {
        if result.has_unresolved_endpoints() {
            return;
        }

        let Some(probe_ip) = result.source_addr() else {
            warn!("Failed to parse probe IP {:?}", result.src_addr);
            return;
        };

        let timestamp = result.timestamp;
        let last_seen = self.probe_ips.entry(probe_ip).or_insert(timestamp);
        *last_seen = (*last_seen).max(timestamp);

        let clean_hops = filter_valid_replies(result);
        let layers = to_node_ids(probe_ip, &clean_hops);

        self.add_nodes_to_graph(&clean_hops, &layers, timestamp);
        self.add_hops_to_graph(&layers, timestamp);

        let probe_node = self.get_or_create_node(NodeId::known(probe_ip));
        probe_node.last_used = probe_node.last_used.max(timestamp);
        probe_node.average_rtt.increment_upper_bound(timestamp);
        probe_node.average_rtt.append(0.0, timestamp);
        probe_node.total_usage.increment_upper_bound(timestamp);
        probe_node.total_usage.append(1.0, timestamp);

        self.route_usage.increment_upper_bound(timestamp);
        self.route_usage.append(1.0, timestamp);

        self.metrics.append(result.msm_id, timestamp);
    }

    /// Update per-vertex statistics for every reply, synthesizing timeout
    /// vertices from the previous layer. `layers[k]` is the (deduplicated)
    /// layer preceding `clean_hops[k]`.
    fn add_nodes_to_graph(
        &mut self,
        clean_hops: &[Vec<CleanReply>],
        layers: &[Vec<NodeId>],
        timestamp: i64,
    ) {
        let mut visited = FxHashSet::default();

        for (hop, previous_layer) in clean_hops.iter().zip(layers) {
            for reply in hop {
                match reply {
                    CleanReply::Known { ip, rtt } => {
                        self.update_graph_node(NodeId::known(*ip), *rtt, timestamp, &mut visited);
                    }
                    CleanReply::Timeout => {
                        for previous in previous_layer.clone() {
                            self.update_graph_node(
                                previous.next_timeout(),
                                0.0,
                                timestamp,
                                &mut visited,
                            );
                        }
                    }
                }
            }
        }
    }

    fn update_graph_node(
        &mut self,
        id: NodeId,
        rtt: f64,
        timestamp: i64,
        visited: &mut FxHashSet<NodeId>,
    ) {
        let node = self.get_or_create_node(id);
        node.last_used = node.last_used.max(timestamp);

        node.average_rtt.increment_upper_bound(timestamp);
        node.average_rtt.append(rtt, timestamp);

        if visited.insert(id) {
            node.total_usage.increment_upper_bound(timestamp);
            node.total_usage.append(1.0, timestamp);
        }
    }

    /// Record the Cartesian product of consecutive layers as directed
    /// edges. Edges between two real routers are mirrored into the clean
    /// edge map together with the source's clean outbound counter.
    fn add_hops_to_graph(&mut self, layers: &[Vec<NodeId>], timestamp: i64) {
        for window in layers.windows(2) {
            let (previous, next) = (&window[0], &window[1]);
            let split = 1.0 / next.len() as f64;

            for src in previous {
                for dst in next {
                    let key = DirectedEdge { start: *src, stop: *dst };
                    let period = self.period;

                    self.edges
                        .entry(key)
                        .or_insert_with(|| Edge::new(period))
                        .observe(split, timestamp);

                    let src_node = self.get_or_create_node(*src);
                    src_node.total_outbound_usage.increment_upper_bound(timestamp);
                    src_node.total_outbound_usage.append(1.0, timestamp);

                    if !src.is_timeout() && !dst.is_timeout() {
                        self.clean_edges
                            .entry(key)
                            .or_insert_with(|| Edge::new(period))
                            .observe(split, timestamp);

                        let src_node = self.get_or_create_node(*src);
                        src_node
                            .total_clean_outbound_usage
                            .increment_upper_bound(timestamp);
                        src_node.total_clean_outbound_usage.append(1.0, timestamp);
                    }
                }
            }
        }
    }

    /// Drop everything last observed strictly before `now − period` and
    /// advance every moving statistic to `now`, so windows stay live even
    /// without fresh data.
    fn evict_outdated(&mut self, now: i64) {
        let cutoff = now - self.period.as_secs() as i64;

        self.nodes.retain(|_, node| node.last_used >= cutoff);
        self.edges.retain(|_, edge| edge.last_used >= cutoff);
        self.clean_edges.retain(|_, edge| edge.last_used >= cutoff);
        self.probe_ips.retain(|_, last_seen| *last_seen >= cutoff);
        self.metrics.evict_up_to(cutoff);

        self.route_usage.increment_upper_bound(now);
        for node in self.nodes.values_mut() {
            node.align(now);
        }
        for edge in self.edges.values_mut() {
            edge.align(now);
        }
        for edge in self.clean_edges.values_mut() {
            edge.align(now);
        }
    }
}

/// Key of one route in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RouteKey {
    /// Probe that ran the traceroutes.
    pub probe_id: u64,
    /// Measurement target.
    pub destination: IpAddr,
}

/// All observed routes, keyed by (probe, destination).
pub struct TracerouteStore {
    period: Duration,
    inner: FxHashMap<RouteKey, RouteData>,
}

impl TracerouteStore {
    /// Create an empty store whose statistics cover the trailing `period`.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            inner: FxHashMap::default(),
        }
    }

    fn get_or_create_route(&mut self, key: RouteKey) -> &mut RouteData {
        let period = self.period;
        self.inner.entry(key).or_insert_with(|| RouteData::new(period))
    }

    /// Merge one result into the route it belongs to. Results without a
    /// parseable destination are logged and dropped.
    pub fn append_result(&mut self, result: &TracerouteResult) {
        let Some(destination) = result.destination_addr() else {
            warn!(
                "Unable to parse destination of measurement {} at {}",
                result.msm_id, result.timestamp
            );
            return;
        };

        let key = RouteKey { probe_id: result.prb_id, destination };
        self.get_or_create_route(key).append_result(result);
    }

    /// Fetch one route.
    pub fn route(&self, probe_id: u64, destination: IpAddr) -> Option<&RouteData> {
        self.inner.get(&RouteKey { probe_id, destination })
    }

    /// Every destination address with at least one route.
    pub fn destinations(&self) -> Vec<IpAddr> {
        let unique: FxHashSet<IpAddr> = self.inner.keys().map(|key| key.destination).collect();
        unique.into_iter().collect()
    }

    /// Evict stale data from every route. A route whose nodes and edges are
    /// all gone is removed outright.
    pub fn evict_outdated(&mut self, now: i64) {
        debug!("Evicting traceroute data older than the statistics period");
        self.inner.retain(|_, route| {
            route.evict_outdated(now);
            !(route.nodes.is_empty() && route.edges.is_empty())
        });
    }

    /// Remove stored data belonging to a measurement. Routes fed solely by
    /// it are dropped outright; routes with other sources only lose the
    /// measurement's metrics entry.
    pub fn drop_measurement_data(&mut self, measurement_id: u64) {
        self.inner.retain(|_, route| {
            if !route.metrics.contains(measurement_id) {
                return true;
            }

            if route.metrics.uses_single_measurement(measurement_id) {
                false
            } else {
                route.metrics.remove(measurement_id);
                true
            }
        });
    }
}

/// Strip errored replies, keeping normal replies and timeouts. Hops that
/// errored wholesale become empty layers, which breaks the path at that
/// point rather than inventing connectivity.
fn filter_valid_replies(result: &TracerouteResult) -> Vec<Vec<CleanReply>> {
    result
        .result
        .iter()
        .map(|hop| match hop {
            TraceHop::Error { .. } => Vec::new(),
            TraceHop::Result { result: replies, .. } => replies
                .iter()
                .filter(|reply| !reply.is_errored())
                .filter_map(|reply| match reply {
                    TraceReply::Timeout { .. } => Some(CleanReply::Timeout),
                    TraceReply::Reply { from, rtt, .. } => {
                        // Validity was established by the error filter.
                        let ip = from.parse().ok()?;
                        Some(CleanReply::Known { ip, rtt: rtt.unwrap_or(0.0) })
                    }
                    TraceReply::Error { .. } => None,
                })
                .collect(),
        })
        .collect()
}

/// How many vertex ids a hop should contribute before deduplication: one
/// per non-timeout reply, plus the whole previous layer once if any reply
/// timed out.
fn expected_layer_size(hop: &[CleanReply], previous_layer_size: usize) -> usize {
    let mut expected = 0;
    let mut found_timeout = false;

    for reply in hop {
        match reply {
            CleanReply::Known { .. } => expected += 1,
            CleanReply::Timeout if !found_timeout => {
                found_timeout = true;
                expected += previous_layer_size;
            }
            CleanReply::Timeout => {}
        }
    }

    expected
}

/// Translate hops into ordered layers of vertex ids. Layer 0 is the probe
/// itself; each subsequent layer holds one vertex per distinct responding
/// address plus, when the hop timed out, one synthetic vertex per vertex of
/// the previous layer. Layers are sorted and deduplicated so equivalent
/// hops compare equal regardless of reply order.
fn to_node_ids(probe_ip: IpAddr, clean_hops: &[Vec<CleanReply>]) -> Vec<Vec<NodeId>> {
    let mut layers = Vec::with_capacity(clean_hops.len() + 1);
    layers.push(vec![NodeId::known(probe_ip)]);

    for hop in clean_hops {
        let previous_size = layers.last().map(Vec::len).unwrap_or_default();
        let mut current = Vec::new();
        let mut added_timeouts = false;

        for reply in hop {
            match reply {
                CleanReply::Known { ip, .. } => current.push(NodeId::known(*ip)),
                CleanReply::Timeout if !added_timeouts => {
                    added_timeouts = true;
                    let previous = layers.last().map(Vec::as_slice).unwrap_or_default();
                    current.extend(previous.iter().map(|id| id.next_timeout()));
                }
                CleanReply::Timeout => {}
            }
        }

        let expected = expected_layer_size(hop, previous_size);
        if expected != current.len() {
            warn!(
                "Violated expectation for number of connected nodes; found {} expected {expected}",
                current.len()
            );
        }

        current.sort_unstable();
        current.dedup();
        layers.push(current);
    }

    layers
}
