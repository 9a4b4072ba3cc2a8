//! Long-running background services and the helper that launches them.

pub mod cleanup;
pub mod ip_to_asn;
pub mod probe_collection;

use std::future::Future;
use tracing::{info, warn};

/// Spawn a named service. Services are expected to run for the life of the
/// process; any exit is logged as premature.
pub fn spawn_service<F>(name: &'static str, service: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    info!("Starting service {name}");

    tokio::spawn(async move {
        match service.await {
            Ok(()) => warn!("Service {name} exited prematurely"),
            Err(e) => warn!("Service {name} exited prematurely: {e}"),
        }
    });
}
