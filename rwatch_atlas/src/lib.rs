//! Client for the RIPE Atlas measurement platform.
//!
//! Strong-typed result and probe structures plus the three ways RouteWatch
//! obtains traceroute results: bounded historical downloads (optionally
//! through an on-disk cache), and an open-ended live stream subscription.

#![deny(clippy::unwrap_used)]

mod cache;
mod live;
mod measurement;
mod probes;
mod results_stream;

pub use cache::{cached_history_results, fresh_history_results};
pub use live::live_results;
pub use measurement::{ReplyError, TraceHop, TraceReply, TracerouteResult};
pub use probes::{fetch_all_probes, fetch_probe_by_id, GeoPoint, Probe};
pub use results_stream::{results_url, stream_results_from_file};

use thiserror::Error;

/// Errors from talking to the measurement platform.
#[derive(Error, Debug)]
pub enum AtlasError {
    /// An upstream HTTP request failed.
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The live stream connection failed.
    #[error("stream connection failed: {0}")]
    Stream(#[from] tokio_tungstenite::tungstenite::Error),
    /// Local cache file I/O failed.
    #[error("cache i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// The upstream response did not have the expected shape.
    #[error("unexpected upstream response: {0}")]
    UpstreamFormat(String),
}
