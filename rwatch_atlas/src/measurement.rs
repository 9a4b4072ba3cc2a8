//! Traceroute result structures, following the published Atlas result
//! format. Only the fields the graph pipeline consumes are modelled; the
//! deserializer ignores the rest.

use serde::Deserialize;
use std::net::IpAddr;

/// One traceroute measurement result: a single run from one probe towards
/// the measurement target.
#[derive(Clone, Debug, Deserialize)]
pub struct TracerouteResult {
    /// Address family, 4 or 6.
    pub af: Option<u8>,
    /// IP address of the destination. Absent when the probe failed to
    /// resolve the target name.
    pub dst_addr: Option<String>,
    /// Name of the destination; for address-targeted measurements this is
    /// the address itself.
    pub dst_name: Option<String>,
    /// Source address used by the probe. Empty when unresolved.
    pub src_addr: Option<String>,
    /// Public address of the probe as seen by the platform.
    pub from: Option<String>,
    /// Measurement this result belongs to.
    pub msm_id: u64,
    /// Probe that produced the result.
    pub prb_id: u64,
    /// Unix timestamp for the start of the run.
    pub timestamp: i64,
    /// Unix timestamp for the end of the run.
    pub endtime: Option<i64>,
    /// "UDP", "ICMP", or "TCP".
    pub proto: Option<String>,
    /// Hop list.
    #[serde(default)]
    pub result: Vec<TraceHop>,
    /// Packet size.
    pub size: Option<u64>,
}

impl TracerouteResult {
    /// Parsed source address, if the probe resolved one.
    pub fn source_addr(&self) -> Option<IpAddr> {
        self.src_addr.as_deref().and_then(|raw| raw.parse().ok())
    }

    /// Parsed destination address. The destination name is preferred since
    /// it identifies the measurement target; it falls back to the resolved
    /// address.
    pub fn destination_addr(&self) -> Option<IpAddr> {
        let parse = |raw: &str| raw.parse().ok();
        self.dst_name
            .as_deref()
            .and_then(parse)
            .or_else(|| self.dst_addr.as_deref().and_then(parse))
    }

    /// True when either endpoint address is missing, which disqualifies the
    /// whole result.
    pub fn has_unresolved_endpoints(&self) -> bool {
        self.src_addr.as_deref().unwrap_or("").is_empty()
            || self.dst_addr.as_deref().unwrap_or("").is_empty()
    }
}

/// One TTL step of a traceroute run.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum TraceHop {
    /// The hop failed wholesale (for example a send error).
    Error {
        /// Error description from the probe.
        error: String,
    },
    /// A normal hop with one entry per probe packet.
    Result {
        /// TTL of this hop.
        hop: u32,
        /// Replies received for this hop.
        #[serde(default)]
        result: Vec<TraceReply>,
    },
}

/// A single reply within a hop.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum TraceReply {
    /// No response within the platform timeout; `x` is always `"*"`.
    Timeout {
        /// Timeout marker.
        x: String,
    },
    /// A connectivity error reported mid-run.
    Error {
        /// Error description.
        error: String,
    },
    /// A response from some router.
    Reply {
        /// ICMP error indicator ("N", "H", ... or a numeric code).
        #[serde(default)]
        err: Option<ReplyError>,
        /// Source address of the reply.
        from: String,
        /// Round-trip time in milliseconds. Absent when the reply was late.
        #[serde(default)]
        rtt: Option<f64>,
        /// Number of packets this reply arrived late by; `rtt` is absent in
        /// that case.
        #[serde(default)]
        late: Option<u32>,
        /// Size of the reply.
        #[serde(default)]
        size: Option<u64>,
        /// Time-to-live of the reply packet.
        #[serde(default)]
        ttl: Option<i64>,
    },
}

/// ICMP error attached to a reply; either a letter code from the result
/// format or a raw numeric code.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ReplyError {
    /// Numeric ICMP code.
    Code(i64),
    /// Letter code, e.g. "N" (network unreachable) or "H" (host
    /// unreachable).
    Icmp(String),
}

impl TraceReply {
    /// True for replies that carry no usable path information: ICMP errors,
    /// late or zero-RTT responses, and unparseable source addresses.
    /// Timeouts are *not* errors; they become synthetic graph nodes.
    pub fn is_errored(&self) -> bool {
        match self {
            TraceReply::Timeout { .. } => false,
            TraceReply::Error { .. } => true,
            TraceReply::Reply { err, from, rtt, late, .. } => {
                if err.is_some() || late.unwrap_or(0) != 0 {
                    return true;
                }

                // A missing or zero RTT marks a response that arrived too
                // late for the probe to time it.
                if !rtt.map(|rtt| rtt > 0.0).unwrap_or(false) {
                    return true;
                }

                from.parse::<IpAddr>().is_err()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{TraceHop, TraceReply, TracerouteResult};

    // A trimmed-down capture of a real result: one responding hop, one
    // all-timeout hop, and a mixed hop with a late reply.
    const SAMPLE: &str = r#"{
        "af": 4,
        "dst_addr": "151.101.0.1",
        "dst_name": "151.101.0.1",
        "src_addr": "192.0.2.7",
        "from": "198.51.100.9",
        "msm_id": 47072659,
        "prb_id": 6041,
        "timestamp": 1677100000,
        "endtime": 1677100002,
        "proto": "ICMP",
        "size": 48,
        "result": [
            {"hop": 1, "result": [
                {"from": "192.0.2.1", "rtt": 1.95, "size": 28, "ttl": 255},
                {"from": "192.0.2.1", "rtt": 2.01, "size": 28, "ttl": 255}
            ]},
            {"hop": 2, "result": [{"x": "*"}, {"x": "*"}, {"x": "*"}]},
            {"hop": 3, "result": [
                {"from": "151.101.0.1", "rtt": 11.3, "size": 28, "ttl": 54},
                {"from": "151.101.0.1", "late": 2, "size": 28, "ttl": 54},
                {"from": "203.0.113.4", "rtt": 10.0, "err": "H", "size": 28, "ttl": 54}
            ]}
        ]
    }"#;

    #[test]
    fn sample_result_deserializes() {
        let result: TracerouteResult = serde_json::from_str(SAMPLE).expect("sample should parse");

        assert_eq!(result.msm_id, 47072659);
        assert_eq!(result.prb_id, 6041);
        assert_eq!(result.source_addr(), "192.0.2.7".parse().ok());
        assert_eq!(result.destination_addr(), "151.101.0.1".parse().ok());
        assert!(!result.has_unresolved_endpoints());
        assert_eq!(result.result.len(), 3);

        let TraceHop::Result { hop, result: replies } = &result.result[1] else {
            panic!("hop 2 should be a result hop");
        };
        assert_eq!(*hop, 2);
        assert!(matches!(replies[0], TraceReply::Timeout { .. }));
    }

    #[test]
    fn error_replies_are_classified() {
        let result: TracerouteResult = serde_json::from_str(SAMPLE).expect("sample should parse");

        let TraceHop::Result { result: replies, .. } = &result.result[2] else {
            panic!("hop 3 should be a result hop");
        };

        assert!(!replies[0].is_errored());
        assert!(replies[1].is_errored(), "late replies carry no timing");
        assert!(replies[2].is_errored(), "ICMP errors are filtered");
    }

    #[test]
    fn timeouts_are_not_errors() {
        let reply: TraceReply = serde_json::from_str(r#"{"x": "*"}"#).expect("timeout literal");
        assert!(!reply.is_errored());
    }

    #[test]
    fn hop_level_errors_deserialize() {
        let hop: TraceHop =
            serde_json::from_str(r#"{"error": "connect failed: Network is unreachable"}"#)
                .expect("error literal");
        assert!(matches!(hop, TraceHop::Error { .. }));
    }

    #[test]
    fn unresolved_destination_is_flagged() {
        let raw = r#"{"msm_id": 1, "prb_id": 2, "timestamp": 0, "dst_name": "example.org",
                      "src_addr": "", "result": []}"#;
        let result: TracerouteResult = serde_json::from_str(raw).expect("should parse");
        assert!(result.has_unresolved_endpoints());
    }
}
