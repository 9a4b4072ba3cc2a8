//! Periodic rebuild of the prefix-to-ASN mapping.

use crate::state::ApplicationState;
use rwatch_asn::IpToAsn;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The dataset publisher recommends refreshing every 12 to 24 hours; use
/// the lower bound.
pub const IP_TO_ASN_REFRESH_PERIOD: Duration = Duration::from_secs(12 * 3600);

/// Sleep until a refresh is due, rebuild the mapping without holding any
/// lock, and swap it in. A failed rebuild keeps the previous mapping and is
/// retried a full period later.
pub async fn run_ip_to_asn_service(state: Arc<ApplicationState>) -> anyhow::Result<()> {
    loop {
        let elapsed = state.ip_to_asn.read().last_refresh().elapsed();

        if elapsed < IP_TO_ASN_REFRESH_PERIOD {
            tokio::time::sleep(IP_TO_ASN_REFRESH_PERIOD - elapsed).await;
            continue;
        }

        match IpToAsn::create().await {
            Ok(fresh) => {
                let entries = fresh.len();
                *state.ip_to_asn.write() = fresh;
                info!("Refreshed IP-to-ASN mapping with {entries} prefixes");
            }
            Err(e) => {
                warn!("Got error while attempting to refresh IP to ASN: {e}");
                state.ip_to_asn.write().mark_refresh_attempt();
            }
        }
    }
}
