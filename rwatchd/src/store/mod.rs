//! In-memory storage of observed traceroute paths.

mod graph;
mod metrics;

pub use graph::{DirectedEdge, Edge, Node, NodeId, RouteData, TracerouteStore};
pub use metrics::TimeRange;
