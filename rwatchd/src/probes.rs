//! The probe catalog: platform probes by id, plus which probes have been
//! observed hitting each destination recently.

use fxhash::FxHashMap;
use rwatch_atlas::Probe;
use std::net::IpAddr;

/// One probe's recent activity against a destination.
#[derive(Clone, Copy, Debug)]
pub struct ProbeUsage {
    /// Probe identifier.
    pub probe_id: u64,
    /// Unix timestamp of the most recent result from this probe.
    pub last_used: i64,
}

/// Probe metadata and per-destination usage, refreshed in the background
/// and consulted by the REST layer.
#[derive(Default)]
pub struct ProbeCatalog {
    probes: FxHashMap<u64, Probe>,
    destination_usage: FxHashMap<IpAddr, Vec<ProbeUsage>>,
}

impl ProbeCatalog {
    /// Insert or replace a probe by id.
    pub fn upsert(&mut self, probe: Probe) {
        self.probes.insert(probe.id, probe);
    }

    /// Look up a probe by id.
    pub fn get(&self, probe_id: u64) -> Option<&Probe> {
        self.probes.get(&probe_id)
    }

    /// Number of cataloged probes.
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// True when the catalog has not been populated yet.
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Iterate all cataloged probes.
    pub fn probes(&self) -> impl Iterator<Item = &Probe> {
        self.probes.values()
    }

    /// Record that `probe_id` produced a result towards `destination`.
    pub fn register_usage(&mut self, destination: IpAddr, probe_id: u64, timestamp: i64) {
        let usages = self.destination_usage.entry(destination).or_default();

        match usages.iter_mut().find(|usage| usage.probe_id == probe_id) {
            Some(usage) => usage.last_used = usage.last_used.max(timestamp),
            None => usages.push(ProbeUsage { probe_id, last_used: timestamp }),
        }
    }

    /// Probes recently active against `destination`.
    pub fn usage_for_destination(&self, destination: IpAddr) -> Vec<ProbeUsage> {
        self.destination_usage
            .get(&destination)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop usage entries last seen strictly before `cutoff`, removing
    /// destinations left with no active probes.
    pub fn evict_usage_before(&mut self, cutoff: i64) {
        self.destination_usage.retain(|_, usages| {
            usages.retain(|usage| usage.last_used >= cutoff);
            !usages.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::ProbeCatalog;
    use std::net::IpAddr;

    fn addr(text: &str) -> IpAddr {
        text.parse().expect("address literal")
    }

    #[test]
    fn usage_registration_updates_in_place() {
        let mut catalog = ProbeCatalog::default();
        let dest = addr("151.101.0.1");

        catalog.register_usage(dest, 10, 100);
        catalog.register_usage(dest, 11, 150);
        catalog.register_usage(dest, 10, 200);
        catalog.register_usage(dest, 10, 120);

        let usages = catalog.usage_for_destination(dest);
        assert_eq!(usages.len(), 2);

        let probe_10 = usages.iter().find(|u| u.probe_id == 10).expect("probe 10");
        assert_eq!(probe_10.last_used, 200, "older reports never regress the timestamp");
    }

    #[test]
    fn usage_eviction_prunes_destinations() {
        let mut catalog = ProbeCatalog::default();
        let dest_a = addr("151.101.0.1");
        let dest_b = addr("151.101.64.1");

        catalog.register_usage(dest_a, 10, 100);
        catalog.register_usage(dest_a, 11, 500);
        catalog.register_usage(dest_b, 12, 100);

        catalog.evict_usage_before(300);

        let remaining = catalog.usage_for_destination(dest_a);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].probe_id, 11);
        assert!(catalog.usage_for_destination(dest_b).is_empty());
    }
}
