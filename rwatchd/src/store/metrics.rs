//! Per-route bookkeeping of which source measurements contributed data and
//! over what time span. Drives the raw-download endpoint and measurement
//! eviction.

use fxhash::FxHashMap;

/// Closed interval of unix timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    /// Earliest contributing timestamp.
    pub start: i64,
    /// Latest contributing timestamp.
    pub end: i64,
}

impl TimeRange {
    fn point(timestamp: i64) -> Self {
        Self { start: timestamp, end: timestamp }
    }

    fn append(mut self, timestamp: i64) -> Self {
        if timestamp < self.start {
            self.start = timestamp;
        }
        if timestamp > self.end {
            self.end = timestamp;
        }
        self
    }

    /// The suffix of this range at or after `timestamp`, or `None` when the
    /// range lies entirely before it.
    fn clip_to(mut self, timestamp: i64) -> Option<Self> {
        if self.end < timestamp {
            return None;
        }

        if self.start < timestamp {
            self.start = timestamp;
        }

        Some(self)
    }
}

/// Which measurements fed a route and over what timestamp range each did.
#[derive(Clone, Debug, Default)]
pub struct RouteUsageMetrics {
    ranges: FxHashMap<u64, TimeRange>,
}

impl RouteUsageMetrics {
    /// Widen the range for `measurement_id` to cover `timestamp`.
    pub fn append(&mut self, measurement_id: u64, timestamp: i64) {
        let range = self
            .ranges
            .get(&measurement_id)
            .copied()
            .unwrap_or(TimeRange::point(timestamp));
        self.ranges.insert(measurement_id, range.append(timestamp));
    }

    /// Clip every range to start at or after `timestamp`, dropping
    /// measurements that fall entirely before it.
    pub fn evict_up_to(&mut self, timestamp: i64) {
        self.ranges = self
            .ranges
            .iter()
            .filter_map(|(id, range)| Some((*id, range.clip_to(timestamp)?)))
            .collect();
    }

    /// True when no measurement other than `measurement_id` contributed.
    /// Vacuously true for an empty route.
    pub fn uses_single_measurement(&self, measurement_id: u64) -> bool {
        self.ranges.keys().all(|id| *id == measurement_id)
    }

    /// True when `measurement_id` contributed data.
    pub fn contains(&self, measurement_id: u64) -> bool {
        self.ranges.contains_key(&measurement_id)
    }

    /// Remove one measurement's range.
    pub fn remove(&mut self, measurement_id: u64) {
        self.ranges.remove(&measurement_id);
    }

    /// Iterate contributing measurements and their ranges.
    pub fn iter(&self) -> impl Iterator<Item = (u64, TimeRange)> + '_ {
        self.ranges.iter().map(|(id, range)| (*id, *range))
    }
}

#[cfg(test)]
mod tests {
    use super::RouteUsageMetrics;

    #[test]
    fn appends_widen_the_range() {
        let mut metrics = RouteUsageMetrics::default();
        metrics.append(7, 100);
        metrics.append(7, 50);
        metrics.append(7, 150);

        let (id, range) = metrics.iter().next().expect("one measurement");
        assert_eq!(id, 7);
        assert_eq!((range.start, range.end), (50, 150));
    }

    #[test]
    fn eviction_clips_and_drops() {
        let mut metrics = RouteUsageMetrics::default();
        metrics.append(1, 100);
        metrics.append(1, 200);
        metrics.append(2, 10);
        metrics.append(2, 20);

        metrics.evict_up_to(150);

        assert!(!metrics.contains(2), "fully-expired measurement is dropped");
        let (_, range) = metrics.iter().next().expect("measurement 1 remains");
        assert_eq!((range.start, range.end), (150, 200));
    }

    #[test]
    fn single_measurement_detection() {
        let mut metrics = RouteUsageMetrics::default();
        assert!(metrics.uses_single_measurement(1));

        metrics.append(1, 100);
        assert!(metrics.uses_single_measurement(1));

        metrics.append(2, 100);
        assert!(!metrics.uses_single_measurement(1));
    }
}
