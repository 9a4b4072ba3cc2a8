//! Wildcard CORS for the frontend, mirrored onto every response.

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

const CORS_HEADERS: [(HeaderName, HeaderValue); 4] = [
    (
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    ),
    (
        HeaderName::from_static("access-control-allow-credentials"),
        HeaderValue::from_static("true"),
    ),
    (
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static(
            "Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, Authorization, \
             accept, origin, Cache-Control, X-Requested-With",
        ),
    ),
    (
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("POST, OPTIONS, GET, PUT, DELETE"),
    ),
];

/// Attach the permissive CORS headers and short-circuit preflight requests
/// with an empty 204.
pub async fn allow_cors(request: Request<Body>, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;

    let mut response = if preflight {
        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap_or_default()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    for (name, value) in CORS_HEADERS {
        headers.insert(name, value);
    }

    response
}
