//! Measurement tracking endpoints.

use super::body::parse_json_body;
use super::error::ApiError;
use crate::collector;
use crate::state::ApplicationState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    atlas_measurement_id: u64,
    #[serde(default)]
    load_history: bool,
    #[serde(default)]
    start_live_collection: bool,
}

/// `POST /api/measurement/start`
pub async fn start_tracking_measurement(
    State(state): State<Arc<ApplicationState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: StartRequest = parse_json_body(&body)?;

    if !request.load_history && !request.start_live_collection {
        return Err(ApiError::InvalidRequest(
            "One or more of loadHistory or startLiveCollection must be enabled\n".to_string(),
        ));
    }

    if request.start_live_collection {
        state
            .measurements
            .enable_live_collection(request.atlas_measurement_id)
            .await?;
    }

    if request.load_history {
        state
            .measurements
            .collect_history(request.atlas_measurement_id)
            .await?;
    }

    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest {
    atlas_measurement_id: u64,
    #[serde(default)]
    drop_stored_data: bool,
}

/// `POST /api/measurement/stop`
pub async fn stop_tracking_measurement(
    State(state): State<Arc<ApplicationState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: StopRequest = parse_json_body(&body)?;

    state
        .measurements
        .disable_live_collection(request.atlas_measurement_id)
        .await?;

    if request.drop_stored_data {
        collector::drop_measurement_data(&state, request.atlas_measurement_id)?;
    }

    Ok(StatusCode::OK)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrackedMeasurement {
    atlas_measurement_id: u64,
    measurement_period_start: i64,
    measurement_period_stop: i64,
    is_loading_history: bool,
    uses_live_collection: bool,
}

/// `POST /api/measurement/list`
pub async fn list_tracked_measurements(
    State(state): State<Arc<ApplicationState>>,
) -> Json<Vec<TrackedMeasurement>> {
    let measurements = state.measurements.snapshot(|id, info| TrackedMeasurement {
        atlas_measurement_id: id,
        measurement_period_start: info.oldest_data.unwrap_or(0),
        measurement_period_stop: info.latest_data.unwrap_or(0),
        is_loading_history: info.collecting_history,
        uses_live_collection: info.performing_live,
    });

    Json(measurements)
}
