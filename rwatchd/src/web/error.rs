//! Mapping from internal failures to HTTP responses.

use crate::collector::ControllerError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

/// Request-level failures. Validation problems carry a short diagnostic;
/// anything unexpected is logged and reported as a bare 500.
#[derive(Debug)]
pub enum ApiError {
    /// The request body was malformed.
    InvalidRequest(String),
    /// The request body exceeded the configured byte limit.
    MessageTooLong,
    /// No route is stored for the requested (probe, destination) pair.
    RoutePairNotFound,
    /// The pair exists but holds no error-free data yet.
    NoRouteData,
    /// A measurement-controller rejection.
    Controller(ControllerError),
}

impl From<ControllerError> for ApiError {
    fn from(error: ControllerError) -> Self {
        Self::Controller(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidRequest(diagnostic) => {
                (StatusCode::BAD_REQUEST, diagnostic).into_response()
            }
            Self::MessageTooLong => {
                (StatusCode::BAD_REQUEST, "Request too long\n").into_response()
            }
            Self::RoutePairNotFound => (
                StatusCode::BAD_REQUEST,
                "unable to find this combination of probe and IP\n",
            )
                .into_response(),
            Self::NoRouteData => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no error-free data to provide\n",
            )
                .into_response(),
            Self::Controller(ControllerError::ControllerUnavailable) => {
                error!("Measurement controller unavailable");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            Self::Controller(rejection) => {
                (StatusCode::BAD_REQUEST, format!("{rejection}\n")).into_response()
            }
        }
    }
}
