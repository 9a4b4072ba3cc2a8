//! Open-ended live result streaming over the platform's WebSocket feed.

use crate::measurement::TracerouteResult;
use crate::AtlasError;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const ATLAS_STREAM_URL: &str = "wss://atlas-stream.ripe.net/stream/";

const RESULT_CHANNEL_BUFFER: usize = 64;

/// Subscribe to live traceroute results for one measurement. The returned
/// channel yields results until the upstream connection closes or errors;
/// dropping the receiver tears the connection down.
pub async fn live_results(
    measurement_id: u64,
) -> Result<mpsc::Receiver<TracerouteResult>, AtlasError> {
    let (mut socket, _) = connect_async(ATLAS_STREAM_URL).await?;

    let subscribe = json!([
        "atlas_subscribe",
        {"stream_type": "result", "type": "traceroute", "msm": measurement_id}
    ]);
    socket.send(Message::Text(subscribe.to_string())).await?;
    info!("Subscribed to live results for measurement {measurement_id}");

    let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_BUFFER);

    tokio::spawn(async move {
        while let Some(message) = socket.next().await {
            let message = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => {
                    info!("Live stream for measurement {measurement_id} closed by upstream");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("Live stream for measurement {measurement_id} failed: {e}");
                    break;
                }
            };

            let Some(result) = parse_stream_message(&message) else {
                debug!("Ignoring non-result stream message");
                continue;
            };

            if result_tx.send(result).await.is_err() {
                // Receiver dropped; unsubscribe by closing the socket.
                break;
            }
        }
    });

    Ok(result_rx)
}

/// Stream frames are either a bare result object or an
/// `["atlas_result", {...}]` event pair.
fn parse_stream_message(message: &str) -> Option<TracerouteResult> {
    let value: Value = serde_json::from_str(message).ok()?;

    let payload = match value {
        Value::Array(mut parts) => {
            let event = parts.first()?.as_str()?;
            if event != "atlas_result" || parts.len() < 2 {
                return None;
            }
            parts.swap_remove(1)
        }
        object @ Value::Object(_) => object,
        _ => return None,
    };

    serde_json::from_value(payload).ok()
}

#[cfg(test)]
mod tests {
    use super::parse_stream_message;

    const RESULT: &str = r#"{"msm_id": 5, "prb_id": 77, "timestamp": 1000, "result": []}"#;

    #[test]
    fn event_pairs_and_bare_objects_both_parse() {
        let event = format!(r#"["atlas_result", {RESULT}]"#);
        assert_eq!(parse_stream_message(&event).map(|r| r.prb_id), Some(77));
        assert_eq!(parse_stream_message(RESULT).map(|r| r.prb_id), Some(77));
    }

    #[test]
    fn control_messages_are_ignored() {
        assert!(parse_stream_message(r#"["atlas_subscribed", {"msm": 5}]"#).is_none());
        assert!(parse_stream_message("42").is_none());
        assert!(parse_stream_message("not json").is_none());
    }
}
