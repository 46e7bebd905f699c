//! Defines the WebSocket frame format between the browser client and the relay.
//!
//! Every frame is a JSON text frame. Client frames carry a `mime_type` and a
//! `data` field; server frames are either media (`text/plain`, `audio/pcm`),
//! turn-control markers, or tool events.

use base64::Engine;
use bytes::Bytes;
use pairlive_core::tools::ToolEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TEXT_PLAIN: &str = "text/plain";
pub const AUDIO_PCM: &str = "audio/pcm";
pub const APPLICATION_JSON: &str = "application/json";
pub const TOOL_EVENT: &str = "tool_event";

/// Why a client frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("mime type not supported: {0}")]
    UnsupportedMimeType(String),
    #[error("expected a JSON text frame")]
    NonTextFrame,
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame is missing the `{0}` field")]
    MissingField(&'static str),
    #[error("frame field `{0}` must be a string")]
    InvalidField(&'static str),
    #[error("audio data is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    /// Raw PCM bytes, already base64-decoded.
    Audio(Bytes),
}

/// What the relay forwards from the agent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    TurnControl { turn_complete: bool, interrupted: bool },
    /// Only partial chunks are ever forwarded.
    TextChunk { text: String, partial: bool },
    AudioChunk(Bytes),
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireFrame<'a> {
    TurnControl {
        turn_complete: bool,
        interrupted: bool,
    },
    Media {
        mime_type: &'static str,
        data: &'a str,
    },
    ToolEvent {
        mime_type: &'static str,
        message_type: &'static str,
        data: &'a ToolEvent,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    mime_type: Option<Value>,
    data: Option<Value>,
}

/// Serializes an outbound event into the JSON text of one frame.
pub fn encode(event: &OutboundEvent) -> serde_json::Result<String> {
    match event {
        OutboundEvent::TurnControl {
            turn_complete,
            interrupted,
        } => serde_json::to_string(&WireFrame::TurnControl {
            turn_complete: *turn_complete,
            interrupted: *interrupted,
        }),
        OutboundEvent::TextChunk { text, .. } => serde_json::to_string(&WireFrame::Media {
            mime_type: TEXT_PLAIN,
            data: text,
        }),
        OutboundEvent::AudioChunk(bytes) => {
            let data = base64::engine::general_purpose::STANDARD.encode(bytes);
            serde_json::to_string(&WireFrame::Media {
                mime_type: AUDIO_PCM,
                data: &data,
            })
        }
    }
}

/// Wraps a tool event into the generic `tool_event` envelope.
pub fn encode_tool_event(event: &ToolEvent) -> serde_json::Result<String> {
    serde_json::to_string(&WireFrame::ToolEvent {
        mime_type: APPLICATION_JSON,
        message_type: TOOL_EVENT,
        data: event,
    })
}

/// Decodes the JSON text of a client frame.
pub fn decode(text: &str) -> Result<InboundMessage, ProtocolError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let mime_type = string_field(raw.mime_type, "mime_type")?;

    match mime_type.as_str() {
        TEXT_PLAIN => Ok(InboundMessage::Text(string_field(raw.data, "data")?)),
        AUDIO_PCM => {
            let data = string_field(raw.data, "data")?;
            let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
            Ok(InboundMessage::Audio(Bytes::from(bytes)))
        }
        _ => Err(ProtocolError::UnsupportedMimeType(mime_type)),
    }
}

fn string_field(value: Option<Value>, name: &'static str) -> Result<String, ProtocolError> {
    match value {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ProtocolError::InvalidField(name)),
        None => Err(ProtocolError::MissingField(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_json(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn encodes_turn_control() {
        let frame = encode(&OutboundEvent::TurnControl {
            turn_complete: true,
            interrupted: false,
        })
        .unwrap();
        assert_eq!(
            as_json(&frame),
            json!({ "turn_complete": true, "interrupted": false })
        );
    }

    #[test]
    fn encodes_media_chunks() {
        let text = encode(&OutboundEvent::TextChunk {
            text: "he".into(),
            partial: true,
        })
        .unwrap();
        assert_eq!(as_json(&text), json!({ "mime_type": "text/plain", "data": "he" }));

        let audio = encode(&OutboundEvent::AudioChunk(Bytes::from_static(&[0, 1, 2]))).unwrap();
        assert_eq!(as_json(&audio), json!({ "mime_type": "audio/pcm", "data": "AAEC" }));
    }

    #[test]
    fn encodes_tool_events_in_an_envelope() {
        let frame = encode_tool_event(&ToolEvent::CursorMove {
            x: 0.5,
            y: 0.25,
            label: None,
        })
        .unwrap();
        assert_eq!(
            as_json(&frame),
            json!({
                "mime_type": "application/json",
                "message_type": "tool_event",
                "data": { "type": "cursor_move", "x": 0.5, "y": 0.25, "label": null }
            })
        );
    }

    #[test]
    fn decodes_text_unchanged() {
        for text in ["hello", "", "emoji ⚡ and \"quotes\"\n"] {
            let frame = json!({ "mime_type": "text/plain", "data": text }).to_string();
            assert_eq!(decode(&frame).unwrap(), InboundMessage::Text(text.to_string()));
        }
    }

    #[test]
    fn decodes_audio_to_the_original_bytes() {
        let bytes: Vec<u8> = (0..=255).collect();
        let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let frame = json!({ "mime_type": "audio/pcm", "data": data }).to_string();
        assert_eq!(decode(&frame).unwrap(), InboundMessage::Audio(Bytes::from(bytes)));
    }

    #[test]
    fn rejects_unknown_mime_types() {
        let frame = json!({ "mime_type": "video/mp4", "data": "AAAA" }).to_string();
        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::UnsupportedMimeType(m)) if m == "video/mp4"
        ));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode("42"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            decode(r#"{"data": "hi"}"#),
            Err(ProtocolError::MissingField("mime_type"))
        ));
        assert!(matches!(
            decode(r#"{"mime_type": "text/plain"}"#),
            Err(ProtocolError::MissingField("data"))
        ));
        assert!(matches!(
            decode(r#"{"mime_type": "text/plain", "data": 7}"#),
            Err(ProtocolError::InvalidField("data"))
        ));
        assert!(matches!(
            decode(r#"{"mime_type": "audio/pcm", "data": "@@not-base64@@"}"#),
            Err(ProtocolError::InvalidBase64(_))
        ));
    }
}
