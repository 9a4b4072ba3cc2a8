//! Periodic eviction of stale traceroute and probe-usage data.

use crate::state::ApplicationState;
use rwatch_config::{CLEANUP_PERIOD, STATISTICS_PERIOD};
use rwatch_utils::unix_time::unix_now;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Sleep until a cleanup is due, then evict everything older than the
/// statistics period under both write locks. Readers observe either the
/// pre- or post-cleanup state, never a partial one.
pub async fn run_cleanup_service(state: Arc<ApplicationState>) -> anyhow::Result<()> {
    let mut last_cleanup = Instant::now();

    loop {
        let elapsed = last_cleanup.elapsed();
        if elapsed < *CLEANUP_PERIOD {
            tokio::time::sleep(*CLEANUP_PERIOD - elapsed).await;
            continue;
        }

        let now = unix_now()?;
        let usage_cutoff = now - STATISTICS_PERIOD.as_secs() as i64;

        {
            let mut traceroute_data = state.traceroute_data.write();
            let mut probe_data = state.probe_data.write();

            traceroute_data.evict_outdated(now);
            probe_data.evict_usage_before(usage_cutoff);
        }

        info!("Evicted traceroute and probe data older than the statistics period");
        last_cleanup = Instant::now();
    }
}
