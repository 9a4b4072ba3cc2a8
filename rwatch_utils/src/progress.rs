use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe counter for periodically logging the progress of a
/// long-running task. Shared freely between workers; `periodic` fires its
/// callback at most once per period regardless of how many threads poll it.
pub struct ProgressCounter {
    count: AtomicU64,
    last_triggered: AtomicU64,
    start_time: Instant,
    period: Duration,
}

impl ProgressCounter {
    /// Create a counter that triggers `periodic` callbacks once per `period`.
    pub fn new(period: Duration) -> Self {
        Self {
            count: AtomicU64::new(0),
            last_triggered: AtomicU64::new(0),
            start_time: Instant::now(),
            period,
        }
    }

    /// Number of increments so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Record one unit of progress.
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Invoke `callback` with the current count if at least one period has
    /// elapsed since the last invocation. Exactly one caller wins when
    /// multiple threads race.
    pub fn periodic<F: FnOnce(u64)>(&self, callback: F) {
        let prev_nanos = self.last_triggered.load(Ordering::Acquire);
        let prev_activation = self.start_time + Duration::from_nanos(prev_nanos);

        if prev_activation + self.period < Instant::now() {
            let desired_end = (Instant::now() + self.period) - self.start_time;

            if self
                .last_triggered
                .compare_exchange(
                    prev_nanos,
                    desired_end.as_nanos() as u64,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                callback(self.count.load(Ordering::Relaxed));
            }
        }
    }
}
