//! Binned moving-window statistics.
//!
//! A `MovingSummation` tracks the sum of values observed over a trailing
//! window of time. The window is approximated by a fixed number of bins, so
//! appends are O(1) and memory is constant regardless of how many values are
//! observed. The approximation is consistent: every summation built with the
//! same period partitions time identically relative to its upper bound, so
//! ratios of summations (coverage fractions) remain meaningful.

use std::time::Duration;
use tracing::warn;

const BIN_COUNT: usize = 100;

/// A moving summation over a trailing window, binned into `BIN_COUNT` slots
/// plus one extra slot that absorbs the partial bin at the far edge, so
/// values exactly one period old still contribute to the sum.
#[derive(Clone, Debug)]
pub struct MovingSummation {
    /// Right edge of the most recent bin, in unix seconds.
    alignment: i64,
    bin_period: i64,
    bins: [f64; BIN_COUNT + 1],
}

impl MovingSummation {
    /// Create a summation covering the trailing `period`. The alignment
    /// starts at the unix epoch; call [`MovingSummation::increment_upper_bound`]
    /// with a current timestamp before the first append.
    pub fn new(period: Duration) -> Self {
        Self {
            alignment: 0,
            bin_period: (period.as_secs() as i64 / BIN_COUNT as i64).max(1),
            bins: [0.0; BIN_COUNT + 1],
        }
    }

    fn shift_bins(&mut self, shift: usize) {
        let shift = shift.min(BIN_COUNT + 1);

        for index in (shift..=BIN_COUNT).rev() {
            self.bins[index] = self.bins[index - shift];
        }

        for bin in &mut self.bins[..shift] {
            *bin = 0.0;
        }
    }

    /// Shift up the observed region so `timestamp` falls within the most
    /// recent bin. Timestamps at or before the current upper bound are a
    /// no-op, so out-of-order calls are harmless.
    pub fn increment_upper_bound(&mut self, timestamp: i64) {
        let shift = (timestamp - self.alignment).div_euclid(self.bin_period);

        if shift > 0 {
            self.shift_bins(shift as usize);
            self.alignment += shift * self.bin_period;
        }
    }

    /// Add a value observed at `timestamp`. The timestamp must not be past
    /// the current upper bound (callers advance the bound first); values
    /// older than the window are silently dropped.
    pub fn append(&mut self, value: f64, timestamp: i64) {
        let target = (self.alignment + self.bin_period - timestamp).div_euclid(self.bin_period);

        if target < 0 {
            debug_assert!(
                false,
                "appended value at {timestamp} is past the upper bound {}",
                self.alignment
            );
            warn!(
                "Dropping moving-statistic value at {timestamp}: past upper bound {}",
                self.alignment
            );
            return;
        }

        if let Some(bin) = self.bins.get_mut(target as usize) {
            *bin += value;
        }
    }

    /// Total of all values within the window.
    pub fn sum(&self) -> f64 {
        self.bins.iter().sum()
    }
}

/// A moving average derived from two summations (value total and count).
#[derive(Clone, Debug)]
pub struct MovingAverage {
    sum: MovingSummation,
    count: MovingSummation,
}

impl MovingAverage {
    /// Create an average covering the trailing `period`.
    pub fn new(period: Duration) -> Self {
        Self {
            sum: MovingSummation::new(period),
            count: MovingSummation::new(period),
        }
    }

    /// See [`MovingSummation::increment_upper_bound`].
    pub fn increment_upper_bound(&mut self, timestamp: i64) {
        self.sum.increment_upper_bound(timestamp);
        self.count.increment_upper_bound(timestamp);
    }

    /// Record a sample observed at `timestamp`.
    pub fn append(&mut self, value: f64, timestamp: i64) {
        self.sum.append(value, timestamp);
        self.count.append(1.0, timestamp);
    }

    /// Mean of the samples within the window, or `None` when the window is
    /// empty.
    pub fn average(&self) -> Option<f64> {
        let count = self.count.sum();
        (count > 0.0).then(|| self.sum.sum() / count)
    }
}
