//! ASR Protocol Handling
//!
//! Builds outbound control messages and parses inbound result messages for
//! both interaction protocols.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use super::constants::*;
use crate::error::DecodeError;

/// Interaction protocol spoken on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Continuous audio, no control framing, incremental per-segment results
    Streaming,
    /// Audio bracketed by start/stop commands, one finalized result
    Oneshot,
}

impl Protocol {
    /// Endpoint to connect to for this protocol, derived from the configured one
    pub fn endpoint_for(&self, base: &str) -> String {
        match self {
            Protocol::Streaming => base.to_string(),
            Protocol::Oneshot => {
                if base.contains(REALTIME_PATH) {
                    base.replace(REALTIME_PATH, ONESHOT_PATH)
                } else if base.contains(ONESHOT_PATH) {
                    base.to_string()
                } else {
                    format!("{}{}", base.trim_end_matches('/'), ONESHOT_PATH)
                }
            }
        }
    }

    /// Chunk duration used when slicing a decoded file
    pub fn default_chunk_duration(&self) -> Duration {
        match self {
            Protocol::Streaming => Duration::from_millis(STREAMING_CHUNK_MS),
            Protocol::Oneshot => Duration::from_millis(ONESHOT_CHUNK_MS),
        }
    }

    /// Control message sent before any audio
    pub fn opening_command(&self) -> Option<ControlMessage> {
        match self {
            Protocol::Streaming => None,
            Protocol::Oneshot => Some(ControlMessage::start()),
        }
    }

    /// Control message sent after the last audio packet
    pub fn closing_command(&self) -> Option<ControlMessage> {
        match self {
            Protocol::Streaming => None,
            Protocol::Oneshot => Some(ControlMessage::stop()),
        }
    }

    /// Decode one inbound text message into a result event
    pub fn decode(&self, text: &str) -> Result<ResultEvent, DecodeError> {
        let json: Value = serde_json::from_str(text)?;
        if !json.is_object() {
            return Err(DecodeError::NotAnObject(json.to_string()));
        }

        match self {
            Protocol::Streaming => Ok(ResultEvent::Segment(SegmentResult::from_json(json))),
            Protocol::Oneshot => Ok(parse_oneshot(json)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Streaming => write!(f, "streaming"),
            Protocol::Oneshot => write!(f, "oneshot"),
        }
    }
}

/// Control command of the oneshot protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Start,
    Stop,
}

/// Control message, serialized as `{"command":"start"}` / `{"command":"stop"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub command: Command,
}

impl ControlMessage {
    pub fn start() -> Self {
        Self {
            command: Command::Start,
        }
    }

    pub fn stop() -> Self {
        Self {
            command: Command::Stop,
        }
    }

    pub fn to_json(&self) -> String {
        // A two-variant enum field cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Message queued for the connection writer
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Encoded 16-bit little-endian PCM
    Audio(Vec<u8>),
    Control(ControlMessage),
}

impl From<OutboundMessage> for Message {
    fn from(msg: OutboundMessage) -> Self {
        match msg {
            OutboundMessage::Audio(bytes) => Message::Binary(bytes),
            OutboundMessage::Control(control) => Message::Text(control.to_json()),
        }
    }
}

/// Result of one segment in the streaming protocol
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentResult {
    pub idx: i64,
    pub text: String,
    pub finished: bool,
    pub raw: Value,
}

impl SegmentResult {
    fn from_json(json: Value) -> Self {
        Self {
            idx: json.get("idx").and_then(|v| v.as_i64()).unwrap_or(0),
            text: json
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            finished: json
                .get("finished")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            raw: json,
        }
    }
}

/// Payload of a oneshot `result` message
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecognitionResult {
    #[serde(default)]
    pub idx: Option<i64>,
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub emotion: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub timestamps: Vec<Value>,
    #[serde(default)]
    pub tokens: Vec<String>,
}

fn default_lang() -> String {
    "auto".to_string()
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ResultEvent {
    /// Streaming protocol result (every inbound object)
    Segment(SegmentResult),
    /// Oneshot `status` message
    Status { status: String },
    /// Oneshot `result` message
    Recognition(RecognitionResult),
    /// Oneshot `error` message; presentation only, never aborts the session
    ServerError { message: String },
    /// Oneshot message of an unrecognized type
    Other(Value),
}

impl ResultEvent {
    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ResultEvent::Segment(_) => "segment",
            ResultEvent::Status { .. } => "status",
            ResultEvent::Recognition(_) => "result",
            ResultEvent::ServerError { .. } => "error",
            ResultEvent::Other(_) => "other",
        }
    }

    /// A streaming segment that later messages will supersede
    pub fn is_partial(&self) -> bool {
        matches!(self, ResultEvent::Segment(segment) if !segment.finished)
    }

    /// Text that belongs in the final transcript, if any
    pub fn final_text(&self) -> Option<&str> {
        match self {
            ResultEvent::Segment(segment) if segment.finished => Some(&segment.text),
            ResultEvent::Recognition(result) => Some(&result.text),
            _ => None,
        }
    }
}

fn parse_oneshot(json: Value) -> ResultEvent {
    let message_type = json
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    match message_type.as_str() {
        "status" => ResultEvent::Status {
            status: json
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        },
        "error" => ResultEvent::ServerError {
            message: json
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        },
        "result" => match serde_json::from_value::<RecognitionResult>(json.clone()) {
            Ok(result) => ResultEvent::Recognition(result),
            Err(e) => {
                tracing::warn!("Result message has unexpected field types: {}", e);
                ResultEvent::Other(json)
            }
        },
        _ => ResultEvent::Other(json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_serialize_as_command_objects() {
        assert_eq!(ControlMessage::start().to_json(), r#"{"command":"start"}"#);
        assert_eq!(ControlMessage::stop().to_json(), r#"{"command":"stop"}"#);
    }

    #[test]
    fn oneshot_endpoint_replaces_realtime_path() {
        let p = Protocol::Oneshot;
        assert_eq!(
            p.endpoint_for("ws://host:8000/sttRealtime"),
            "ws://host:8000/oneshot"
        );
        assert_eq!(p.endpoint_for("ws://host:8000/"), "ws://host:8000/oneshot");
        assert_eq!(p.endpoint_for("ws://host:8000/oneshot"), "ws://host:8000/oneshot");
        assert_eq!(
            Protocol::Streaming.endpoint_for("ws://host:8000/sttRealtime"),
            "ws://host:8000/sttRealtime"
        );
    }

    #[test]
    fn streaming_treats_every_object_as_segment() {
        let event = Protocol::Streaming
            .decode(r#"{"idx":3,"text":"hi","finished":true}"#)
            .unwrap();
        match event {
            ResultEvent::Segment(s) => {
                assert_eq!(s.idx, 3);
                assert_eq!(s.text, "hi");
                assert!(s.finished);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let event = Protocol::Streaming.decode(r#"{"type":"status"}"#).unwrap();
        assert_eq!(event.kind(), "segment");
        assert!(event.is_partial());
    }

    #[test]
    fn oneshot_dispatches_on_type() {
        let p = Protocol::Oneshot;
        assert_eq!(
            p.decode(r#"{"type":"status","status":"ready"}"#).unwrap(),
            ResultEvent::Status {
                status: "ready".into()
            }
        );
        assert_eq!(
            p.decode(r#"{"type":"error","message":"boom"}"#).unwrap(),
            ResultEvent::ServerError {
                message: "boom".into()
            }
        );

        let result = p
            .decode(r#"{"type":"result","text":"hello","lang":"en","tokens":["hel","lo"],"timestamps":[[0,120]]}"#)
            .unwrap();
        match result {
            ResultEvent::Recognition(r) => {
                assert_eq!(r.text, "hello");
                assert_eq!(r.lang, "en");
                assert_eq!(r.tokens, vec!["hel", "lo"]);
                assert_eq!(r.timestamps.len(), 1);
                assert!(r.emotion.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(p.decode(r#"{"foo":1}"#).unwrap().kind(), "other");
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(
            Protocol::Oneshot.decode("{not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Protocol::Streaming.decode("[1,2]"),
            Err(DecodeError::NotAnObject(_))
        ));
    }

    #[test]
    fn outbound_messages_map_to_frames() {
        let msg: Message = OutboundMessage::Audio(vec![1, 2]).into();
        assert_eq!(msg, Message::Binary(vec![1, 2]));
        let msg: Message = OutboundMessage::Control(ControlMessage::stop()).into();
        assert_eq!(msg, Message::Text(r#"{"command":"stop"}"#.to_string()));
    }
}
