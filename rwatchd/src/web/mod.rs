//! The REST surface.

mod body;
mod cors;
mod error;
mod measurement;
mod probes;
mod traceroute;

use crate::state::ApplicationState;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use rwatch_config::SERVER_MODE;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

async fn landing_page() -> Html<&'static str> {
    Html(include_str!("landing.html"))
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({})))
}

fn router(state: Arc<ApplicationState>) -> Router {
    let api = Router::new()
        .route("/destinations", get(probes::get_destinations))
        .route("/traceroute/raw", post(traceroute::get_traceroute_raw))
        .route("/traceroute/clean", post(traceroute::get_traceroute_clean))
        .route("/traceroute/full", post(traceroute::get_traceroute_full))
        .route("/probes", post(probes::get_probes))
        .route("/probes/list", get(probes::get_probes_list))
        .route("/measurement/start", post(measurement::start_tracking_measurement))
        .route("/measurement/stop", post(measurement::stop_tracking_measurement))
        .route("/measurement/list", post(measurement::list_tracked_measurements));

    Router::new()
        .route("/", get(landing_page))
        .nest("/api", api)
        .fallback(not_found)
        .layer(middleware::from_fn(cors::allow_cors))
        .with_state(state)
}

/// Bind and serve the REST API. Release mode binds the privileged HTTP
/// port; anything else uses the development port.
pub async fn run_rest_api(state: Arc<ApplicationState>) -> anyhow::Result<()> {
    let port: u16 = if SERVER_MODE.as_str() == "release" { 80 } else { 8080 };

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("REST API listening on port {port}");

    axum::serve(listener, router(state)).await?;
    anyhow::bail!("REST API stopped accepting connections")
}
