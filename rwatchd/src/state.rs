//! Process-wide shared state.
//!
//! Every mutable field carries its own reader/writer lock; locks are held
//! for brief critical sections only and never across network I/O.

use crate::collector::MeasurementTracker;
use crate::probes::ProbeCatalog;
use crate::store::TracerouteStore;
use parking_lot::RwLock;
use rwatch_asn::IpToAsn;
use rwatch_config::STATISTICS_PERIOD;
use std::net::IpAddr;

/// Shared state of the server, created once at startup and handed to every
/// service. Frequent readers (the REST layer) take shared locks; ingestion
/// and refresh paths take the corresponding exclusive lock.
pub struct ApplicationState {
    /// All observed traceroute graphs.
    pub traceroute_data: RwLock<TracerouteStore>,
    /// Tracked measurement collection state.
    pub measurements: MeasurementTracker,
    /// Prefix-to-ASN resolver, swapped wholesale on refresh.
    pub ip_to_asn: RwLock<IpToAsn>,
    /// Probe metadata and destination usage.
    pub probe_data: RwLock<ProbeCatalog>,
}

impl ApplicationState {
    /// Assemble the state from its initialized parts.
    pub fn new(ip_to_asn: IpToAsn, measurements: MeasurementTracker) -> Self {
        Self {
            traceroute_data: RwLock::new(TracerouteStore::new(*STATISTICS_PERIOD)),
            measurements,
            ip_to_asn: RwLock::new(ip_to_asn),
            probe_data: RwLock::new(ProbeCatalog::default()),
        }
    }

    /// Thread-safe ASN lookup.
    pub fn lookup_asn(&self, addr: IpAddr) -> Option<u32> {
        self.ip_to_asn.read().get(addr)
    }
}
