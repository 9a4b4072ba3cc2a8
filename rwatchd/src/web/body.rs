//! Length-limited JSON body parsing shared by the POST handlers.

use super::error::ApiError;
use axum::body::Bytes;
use rwatch_config::REQUEST_BYTE_LIMIT;
use serde::de::DeserializeOwned;

/// Parse a request body, enforcing the configured byte limit before
/// touching the JSON.
pub fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    if body.len() > *REQUEST_BYTE_LIMIT {
        return Err(ApiError::MessageTooLong);
    }

    serde_json::from_slice(body)
        .map_err(|e| ApiError::InvalidRequest(format!("Request is not valid JSON: {e}\n")))
}

#[cfg(test)]
mod tests {
    use super::parse_json_body;
    use crate::web::error::ApiError;
    use axum::body::Bytes;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Request {
        value: u32,
    }

    #[test]
    fn valid_bodies_parse() {
        let body = Bytes::from_static(br#"{"value": 7}"#);
        let request: Request = parse_json_body(&body).expect("body should parse");
        assert_eq!(request.value, 7);
    }

    #[test]
    fn invalid_json_is_a_bad_request() {
        let body = Bytes::from_static(b"{nope");
        let result: Result<Request, _> = parse_json_body(&body);
        assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
    }

    #[test]
    fn oversized_bodies_are_rejected_before_parsing() {
        let oversized = vec![b' '; *rwatch_config::REQUEST_BYTE_LIMIT + 1];
        let result: Result<Request, _> = parse_json_body(&Bytes::from(oversized));
        assert!(matches!(result, Err(ApiError::MessageTooLong)));
    }
}
