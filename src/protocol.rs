//! Wire protocol types for the relay's WebSocket endpoints.
//!
//! The relay exposes two endpoints: `/ws/events` streams every message
//! flowing through the hub as JSON text frames, and `/ws/control` accepts
//! publish/ping commands and answers with acknowledgement frames that may
//! also carry drop telemetry.
//!
//! Decoding is best-effort by design: event fields are all optional and
//! default rather than reject, and a frame that is not a JSON object at all
//! yields a [`DecodeError`] the caller discards without touching any state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path of the read-only event stream endpoint.
pub const EVENTS_PATH: &str = "/ws/events";

/// Path of the bidirectional control endpoint.
pub const CONTROL_PATH: &str = "/ws/control";

/// One relay-delivered event, immutable once decoded.
///
/// Every field is optional on the wire; missing or mistyped fields default
/// instead of failing the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Server-assigned timestamp, an opaque ordering key. Not guaranteed
    /// monotonic across reconnects.
    pub ts: Option<String>,
    /// Event category (`"bus"`, `"monitor"`, ...). Absent or non-string
    /// values decode as `"unknown"`.
    pub kind: String,
    /// Emitting component (`"xsub"`, `"inject"`, ...).
    pub source: Option<String>,
    /// Routing key the event was published under. May be any JSON value.
    pub topic: Option<Value>,
    /// Message body. May be any JSON value.
    pub payload: Option<Value>,
    /// Per-event metadata the relay attaches (frame sizes, socket monitor
    /// details). Passed through untouched.
    pub meta: Option<Value>,
}

impl Event {
    /// Topic rendered for display: strings as-is, absent/null empty,
    /// anything else as compact JSON.
    #[must_use]
    pub fn topic_text(&self) -> String {
        display_value(self.topic.as_ref())
    }

    /// Payload rendered for display, same rules as [`Self::topic_text`].
    #[must_use]
    pub fn payload_text(&self) -> String {
        display_value(self.payload.as_ref())
    }
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Decode one `/ws/events` frame.
///
/// # Errors
///
/// Returns [`DecodeError`] if `text` is not valid JSON or not a JSON
/// object. Field-level problems never fail the frame.
pub fn decode_event(text: &str) -> Result<Event, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let non_null = |key: &str| obj.get(key).filter(|v| !v.is_null()).cloned();
    let as_string = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_owned);

    Ok(Event {
        ts: as_string("ts"),
        kind: obj
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned(),
        source: as_string("source"),
        topic: non_null("topic"),
        payload: non_null("payload"),
        meta: non_null("meta"),
    })
}

/// One server→client frame on `/ws/control`.
///
/// Any subset of fields may be present in a single frame: a drop-report
/// (`dropped_ws`), an acknowledgement (`ok` + optional `error`), a pong
/// (`action`/`ts`), or any combination.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ControlFrame {
    /// Relay-reported count of events dropped due to backpressure.
    #[serde(default)]
    pub dropped_ws: Option<u64>,
    /// Acknowledgement verdict for the in-flight publish.
    #[serde(default)]
    pub ok: Option<bool>,
    /// Server-supplied failure reason accompanying `ok: false`.
    #[serde(default)]
    pub error: Option<String>,
    /// Server-initiated action, only `"pong"` in the current relay.
    #[serde(default)]
    pub action: Option<String>,
    /// Timestamp accompanying a pong.
    #[serde(default)]
    pub ts: Option<String>,
}

impl ControlFrame {
    /// True when the frame carries neither telemetry nor an ack.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.dropped_ws.is_none() && self.ok.is_none()
    }
}

/// Decode one server→client `/ws/control` frame.
///
/// # Errors
///
/// Returns [`DecodeError`] for non-JSON text or mistyped known fields.
pub fn decode_control(text: &str) -> Result<ControlFrame, DecodeError> {
    serde_json::from_str(text).map_err(DecodeError::Json)
}

/// How the relay should interpret a published payload string.
///
/// The member set is owned by the relay's contract; the client passes the
/// tag through without touching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Payload is the literal UTF-8 text.
    Utf8,
    /// Payload is base64 for raw bytes.
    Base64,
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" => Ok(Self::Utf8),
            "base64" => Ok(Self::Base64),
            other => Err(format!("encoding must be 'utf8' or 'base64', got '{other}'")),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Utf8 => write!(f, "utf8"),
            Self::Base64 => write!(f, "base64"),
        }
    }
}

/// Client→server publish command envelope.
#[derive(Debug, Clone, Serialize)]
pub struct PublishFrame<'a> {
    /// Always `"publish"`.
    pub action: &'static str,
    /// Routing key, validated non-empty before construction.
    pub topic: &'a str,
    /// Raw payload text as entered by the caller.
    pub payload: &'a str,
    /// Payload interpretation tag.
    pub encoding: Encoding,
    /// Extra base64-encoded frames published after the topic frame.
    /// When present the relay ignores `payload`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipart: Option<&'a [String]>,
}

/// The keepalive command sent periodically on the control channel.
#[must_use]
pub fn ping_frame() -> String {
    serde_json::json!({"action": "ping"}).to_string()
}

/// A frame failed to decode as the expected message envelope.
///
/// Always recovered locally: the offending frame is discarded, no state is
/// mutated, and the connection stays open.
#[derive(Debug)]
pub enum DecodeError {
    /// The text was not valid JSON, or a known field had the wrong type.
    Json(serde_json::Error),
    /// The text was valid JSON but not an object envelope.
    NotAnObject,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "invalid JSON: {e}"),
            Self::NotAnObject => write!(f, "frame is not a JSON object"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::NotAnObject => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event_full() {
        let ev = decode_event(
            r#"{"ts":"2025-01-01T00:00:00Z","kind":"bus","source":"xsub",
                "topic":"sensors/a","payload":"41.5","meta":{"parts":2}}"#,
        )
        .unwrap();
        assert_eq!(ev.ts.as_deref(), Some("2025-01-01T00:00:00Z"));
        assert_eq!(ev.kind, "bus");
        assert_eq!(ev.source.as_deref(), Some("xsub"));
        assert_eq!(ev.topic_text(), "sensors/a");
        assert_eq!(ev.payload_text(), "41.5");
        assert!(ev.meta.is_some());
    }

    #[test]
    fn test_decode_event_empty_object_defaults() {
        let ev = decode_event("{}").unwrap();
        assert_eq!(ev.kind, "unknown");
        assert!(ev.ts.is_none());
        assert!(ev.source.is_none());
        assert_eq!(ev.topic_text(), "");
        assert_eq!(ev.payload_text(), "");
    }

    #[test]
    fn test_decode_event_null_and_mistyped_fields_default() {
        // kind: null and a numeric ts must not reject the frame
        let ev = decode_event(r#"{"kind":null,"ts":42,"topic":null}"#).unwrap();
        assert_eq!(ev.kind, "unknown");
        assert!(ev.ts.is_none());
        assert!(ev.topic.is_none());
    }

    #[test]
    fn test_decode_event_structured_topic_and_payload() {
        let ev = decode_event(r#"{"topic":{"a":1},"payload":[1,2,3]}"#).unwrap();
        assert_eq!(ev.topic_text(), r#"{"a":1}"#);
        assert_eq!(ev.payload_text(), "[1,2,3]");
    }

    #[test]
    fn test_decode_event_rejects_non_json() {
        assert!(matches!(decode_event("not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_event_rejects_non_object() {
        assert!(matches!(decode_event("[1,2]"), Err(DecodeError::NotAnObject)));
    }

    #[test]
    fn test_decode_control_subsets() {
        let drop_only = decode_control(r#"{"dropped_ws":5}"#).unwrap();
        assert_eq!(drop_only.dropped_ws, Some(5));
        assert!(drop_only.ok.is_none());

        let ack = decode_control(r#"{"ok":false,"error":"unknown_action"}"#).unwrap();
        assert_eq!(ack.ok, Some(false));
        assert_eq!(ack.error.as_deref(), Some("unknown_action"));

        let combined = decode_control(r#"{"ok":true,"dropped_ws":7}"#).unwrap();
        assert_eq!(combined.ok, Some(true));
        assert_eq!(combined.dropped_ws, Some(7));

        let pong = decode_control(r#"{"action":"pong","ts":"t"}"#).unwrap();
        assert!(pong.is_noop());
    }

    #[test]
    fn test_decode_control_rejects_garbage() {
        assert!(decode_control("not json").is_err());
    }

    #[test]
    fn test_publish_frame_shape() {
        let frame = PublishFrame {
            action: "publish",
            topic: "sensors/a",
            payload: "41.5",
            encoding: Encoding::Utf8,
            multipart: None,
        };
        let json: Value = serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["action"], "publish");
        assert_eq!(json["topic"], "sensors/a");
        assert_eq!(json["payload"], "41.5");
        assert_eq!(json["encoding"], "utf8");
        assert!(json.get("multipart").is_none());
    }

    #[test]
    fn test_publish_frame_multipart() {
        let parts = vec!["AAEC".to_string(), "AwQF".to_string()];
        let frame = PublishFrame {
            action: "publish",
            topic: "t",
            payload: "",
            encoding: Encoding::Base64,
            multipart: Some(&parts),
        };
        let json: Value = serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["encoding"], "base64");
        assert_eq!(json["multipart"][1], "AwQF");
    }

    #[test]
    fn test_encoding_round_trip() {
        assert_eq!("utf8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("BASE64".parse::<Encoding>().unwrap(), Encoding::Base64);
        assert!("hex".parse::<Encoding>().is_err());
        assert_eq!(Encoding::Utf8.to_string(), "utf8");
    }

    #[test]
    fn test_ping_frame() {
        let json: Value = serde_json::from_str(&ping_frame()).unwrap();
        assert_eq!(json["action"], "ping");
    }
}
