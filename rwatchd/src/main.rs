//! RouteWatch daemon: ingests traceroute measurements from the RIPE Atlas
//! platform and serves weighted per-(probe, destination) path graphs.

mod collector;
mod probes;
mod services;
mod state;
mod store;
mod web;

use crate::collector::{run_collection_controller, MeasurementTracker};
use crate::services::cleanup::run_cleanup_service;
use crate::services::ip_to_asn::run_ip_to_asn_service;
use crate::services::probe_collection::run_probe_collection_service;
use crate::services::spawn_service;
use crate::state::ApplicationState;
use anyhow::Context;
use rwatch_asn::IpToAsn;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log level comes from RUST_LOG, defaulting to "info".
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("RouteWatch daemon starting");

    // Initialization failures are fatal: without the ASN mapping the graph
    // projections would be silently wrong, so exit before serving traffic.
    let ip_to_asn = IpToAsn::create()
        .await
        .context("failed to build the initial IP-to-ASN mapping")?;
    info!("Loaded initial IP-to-ASN mapping with {} prefixes", ip_to_asn.len());

    let (measurements, collection_requests) = MeasurementTracker::new();
    let state = Arc::new(ApplicationState::new(ip_to_asn, measurements));

    spawn_service(
        "TracerouteDataService",
        run_collection_controller(state.clone(), collection_requests),
    );
    spawn_service("IpToAsnService", run_ip_to_asn_service(state.clone()));
    spawn_service("ProbeCollectionService", run_probe_collection_service(state.clone()));
    spawn_service("CleanupService", run_cleanup_service(state.clone()));
    spawn_service("RestApiService", web::run_rest_api(state));

    tokio::signal::ctrl_c().await?;
    warn!("Terminating on interrupt signal");

    Ok(())
}
