//! Wire frames exchanged over the realtime WebSocket.
//!
//! Every frame is a JSON object tagged by `kind`. Older servers tag with
//! `type` and use `connection`, `user_status` and `typing_status` for the
//! ack, presence and typing kinds; [`decode`] accepts both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FrameError;
use crate::message::Message;
use crate::timefmt::deserialize_optional_timestamp;

const KNOWN_KINDS: &[&str] = &[
    "connection_ack",
    "connection",
    "message",
    "presence",
    "user_status",
    "typing",
    "typing_status",
    "read_receipt",
    "ping",
    "pong",
];

/// Online state carried by a presence frame. Anything other than `online`
/// counts as offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    #[serde(other)]
    Offline,
}

/// Frames sent FROM the server TO this client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Server accepted the connection
    #[serde(alias = "connection")]
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A chat message addressed to or sent by this user
    Message(Message),
    /// A user came online or went offline
    #[serde(alias = "user_status")]
    Presence {
        user_id: String,
        status: PresenceStatus,
    },
    /// A user started or stopped typing to this user
    #[serde(alias = "typing_status")]
    Typing { user_id: String, is_typing: bool },
    /// The counterpart read messages this user sent
    ReadReceipt {
        message_ids: Vec<String>,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "deserialize_optional_timestamp"
        )]
        read_at: Option<DateTime<Utc>>,
    },
    Ping,
    Pong,
    /// A well-formed frame with a kind this client does not handle
    #[serde(skip)]
    Unknown { kind: String },
}

impl InboundFrame {
    pub fn kind(&self) -> &str {
        match self {
            Self::ConnectionAck { .. } => "connection_ack",
            Self::Message(_) => "message",
            Self::Presence { .. } => "presence",
            Self::Typing { .. } => "typing",
            Self::ReadReceipt { .. } => "read_receipt",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Unknown { kind } => kind,
        }
    }
}

/// Frames sent FROM this client TO the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Relay a message that was already persisted over REST
    Message {
        receiver_id: String,
        content: String,
        message_id: String,
    },
    Typing {
        receiver_id: String,
        is_typing: bool,
    },
    ReadReceipt {
        receiver_id: String,
        message_ids: Vec<String>,
    },
    Ping,
}

impl OutboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Typing { .. } => "typing",
            Self::ReadReceipt { .. } => "read_receipt",
            Self::Ping => "ping",
        }
    }
}

/// Decode one inbound text frame.
///
/// Unrecognized kinds decode to [`InboundFrame::Unknown`]; only frames that
/// are not JSON objects, carry no kind, or have a malformed payload for a
/// known kind are errors.
pub fn decode(text: &str) -> Result<InboundFrame, FrameError> {
    let mut value: Value = serde_json::from_str(text)?;
    let obj = value.as_object_mut().ok_or(FrameError::NotAnObject)?;

    if !obj.contains_key("kind") {
        if let Some(tag) = obj.remove("type") {
            obj.insert("kind".to_string(), tag);
        }
    }

    let kind = obj
        .get("kind")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingKind)?
        .to_string();

    if !KNOWN_KINDS.contains(&kind.as_str()) {
        return Ok(InboundFrame::Unknown { kind });
    }

    serde_json::from_value(value).map_err(|source| FrameError::Payload { kind, source })
}

/// Encode one outbound frame as JSON text.
pub fn encode(frame: &OutboundFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // ── inbound ─────────────────────────────────────────────────────────

    #[test]
    fn test_decode_connection_ack() {
        let frame = decode(r#"{"kind":"connection_ack","user_id":"u-1"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::ConnectionAck {
                user_id: Some("u-1".into()),
                message: None,
            }
        );
    }

    #[test]
    fn test_decode_message() {
        let json = r#"{"kind":"message","sender_id":"alice","receiver_id":"bob","content":"hey","message_id":"m-1","sent_at":"2026-03-18T15:20:00"}"#;
        match decode(json).unwrap() {
            InboundFrame::Message(msg) => {
                assert_eq!(msg.message_id, "m-1");
                assert_eq!(msg.sender_id, "alice");
                assert_eq!(msg.content, "hey");
                assert!(!msg.is_read);
                assert_eq!(
                    msg.sent_at,
                    Utc.with_ymd_and_hms(2026, 3, 18, 15, 20, 0).unwrap()
                );
            }
            other => panic!("Expected Message frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_presence() {
        let frame = decode(r#"{"kind":"presence","user_id":"u-2","status":"online"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Presence {
                user_id: "u-2".into(),
                status: PresenceStatus::Online,
            }
        );
    }

    #[test]
    fn test_decode_presence_other_status_is_offline() {
        let frame = decode(r#"{"kind":"presence","user_id":"u-2","status":"away"}"#).unwrap();
        assert!(matches!(
            frame,
            InboundFrame::Presence {
                status: PresenceStatus::Offline,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_typing() {
        let frame = decode(r#"{"kind":"typing","user_id":"u-3","is_typing":true}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Typing {
                user_id: "u-3".into(),
                is_typing: true,
            }
        );
    }

    #[test]
    fn test_decode_read_receipt() {
        let json = r#"{"kind":"read_receipt","message_ids":["m-1","m-2"],"read_at":"2026-03-18T15:25:00Z"}"#;
        match decode(json).unwrap() {
            InboundFrame::ReadReceipt {
                message_ids,
                read_at,
            } => {
                assert_eq!(message_ids, vec!["m-1", "m-2"]);
                assert_eq!(
                    read_at,
                    Some(Utc.with_ymd_and_hms(2026, 3, 18, 15, 25, 0).unwrap())
                );
            }
            other => panic!("Expected ReadReceipt frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_ping_pong() {
        assert_eq!(decode(r#"{"kind":"ping"}"#).unwrap(), InboundFrame::Ping);
        assert_eq!(decode(r#"{"kind":"pong"}"#).unwrap(), InboundFrame::Pong);
    }

    #[test]
    fn test_decode_legacy_type_tag_and_names() {
        let frame = decode(r#"{"type":"user_status","user_id":"u-2","status":"offline"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Presence {
                user_id: "u-2".into(),
                status: PresenceStatus::Offline,
            }
        );

        let frame = decode(r#"{"type":"typing_status","user_id":"u-2","is_typing":false}"#).unwrap();
        assert_eq!(frame.kind(), "typing");

        let frame = decode(r#"{"type":"connection","message":"welcome"}"#).unwrap();
        assert_eq!(frame.kind(), "connection_ack");
    }

    #[test]
    fn test_decode_unknown_kind_is_not_an_error() {
        let frame = decode(r#"{"kind":"match_created","match_id":"x"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Unknown {
                kind: "match_created".into()
            }
        );
        assert_eq!(frame.kind(), "match_created");
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(decode("{not json"), Err(FrameError::Json(_))));
    }

    #[test]
    fn test_decode_non_object() {
        assert!(matches!(decode("[1,2,3]"), Err(FrameError::NotAnObject)));
        assert!(matches!(decode("\"ping\""), Err(FrameError::NotAnObject)));
    }

    #[test]
    fn test_decode_missing_kind() {
        assert!(matches!(
            decode(r#"{"user_id":"u-1"}"#),
            Err(FrameError::MissingKind)
        ));
        assert!(matches!(
            decode(r#"{"kind":42}"#),
            Err(FrameError::MissingKind)
        ));
    }

    #[test]
    fn test_decode_known_kind_bad_payload() {
        let err = decode(r#"{"kind":"typing","user_id":"u-1"}"#).unwrap_err();
        match err {
            FrameError::Payload { kind, .. } => assert_eq!(kind, "typing"),
            other => panic!("Expected Payload error, got {other:?}"),
        }
    }

    // ── outbound ────────────────────────────────────────────────────────

    #[test]
    fn test_encode_message() {
        let frame = OutboundFrame::Message {
            receiver_id: "bob".into(),
            content: "hi".into(),
            message_id: "m-1".into(),
        };
        let json: Value = serde_json::from_str(&encode(&frame).unwrap()).unwrap();
        assert_eq!(json["kind"], "message");
        assert_eq!(json["receiver_id"], "bob");
        assert_eq!(json["content"], "hi");
        assert_eq!(json["message_id"], "m-1");
    }

    #[test]
    fn test_encode_typing() {
        let frame = OutboundFrame::Typing {
            receiver_id: "bob".into(),
            is_typing: false,
        };
        assert_eq!(
            encode(&frame).unwrap(),
            r#"{"kind":"typing","receiver_id":"bob","is_typing":false}"#
        );
    }

    #[test]
    fn test_encode_read_receipt() {
        let frame = OutboundFrame::ReadReceipt {
            receiver_id: "bob".into(),
            message_ids: vec!["m-1".into(), "m-2".into()],
        };
        let json: Value = serde_json::from_str(&encode(&frame).unwrap()).unwrap();
        assert_eq!(json["kind"], "read_receipt");
        assert_eq!(json["message_ids"], serde_json::json!(["m-1", "m-2"]));
    }

    #[test]
    fn test_encode_ping() {
        assert_eq!(encode(&OutboundFrame::Ping).unwrap(), r#"{"kind":"ping"}"#);
    }
}
