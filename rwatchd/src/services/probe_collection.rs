//! Periodic refresh of the probe catalog.

use crate::state::ApplicationState;
use rwatch_atlas::{fetch_all_probes, fetch_probe_by_id, AtlasError, Probe};
use rwatch_config::PROBE_COLLECTION_REFRESH_PERIOD;
use std::sync::Arc;
use tracing::{info, warn};

/// Fetch the catalog at startup and again every refresh period. A failed
/// refresh keeps the previous catalog.
pub async fn run_probe_collection_service(state: Arc<ApplicationState>) -> anyhow::Result<()> {
    loop {
        match refresh_probe_catalog(&state).await {
            Ok(count) => info!("Probe catalog refreshed; {count} probes upserted"),
            Err(e) => warn!("Unable to refresh the probe catalog: {e}"),
        }

        tokio::time::sleep(*PROBE_COLLECTION_REFRESH_PERIOD).await;
    }
}

/// Absorb probes from the paginated fetch into the catalog. The write lock
/// is taken per probe, so REST readers interleave freely with a refresh.
async fn refresh_probe_catalog(state: &ApplicationState) -> Result<usize, AtlasError> {
    let mut probes = fetch_all_probes().await?;
    let mut count = 0usize;

    while let Some(probe) = probes.recv().await {
        state.probe_data.write().upsert(probe);
        count += 1;
    }

    Ok(count)
}

/// Look a probe up in the catalog, falling back to a single-probe fetch
/// that is cached for next time.
pub async fn probe_by_id(state: &ApplicationState, probe_id: u64) -> Option<Probe> {
    if let Some(probe) = state.probe_data.read().get(probe_id) {
        return Some(probe.clone());
    }

    match fetch_probe_by_id(probe_id).await {
        Ok(Some(probe)) => {
            state.probe_data.write().upsert(probe.clone());
            Some(probe)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Could not fetch probe {probe_id}: {e}");
            None
        }
    }
}
