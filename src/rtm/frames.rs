//! WebSocket wire protocol: one JSON object per text frame.
//!
//! Client-to-server frames are `hello`, `ack` and `pong`; server-to-client
//! frames are `ready`, `ping`, `error` and the `event.*` family. Unknown
//! client frame types are a protocol error.

use crate::state::types::ts_ms;
use crate::stream::types::{MessageView, ReactionCount, StreamEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Client -> server
// ============================================================================

/// Subscription filter carried by `hello`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subscriptions {
    /// Rooms by name or room id.
    #[serde(default)]
    pub rooms: Vec<String>,
    /// Enroll this session in all DMs addressed to its user.
    #[serde(default)]
    pub dms: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Declare subscriptions and optionally advance cursors.
    Hello {
        #[serde(default)]
        subscriptions: Subscriptions,
        /// `"room:<key>" | "dm:<user_id>" -> seq`
        #[serde(default)]
        cursors: HashMap<String, u64>,
    },
    /// Advance read cursors.
    Ack {
        cursors: HashMap<String, u64>,
    },
    /// Heartbeat reply.
    Pong {
        #[serde(default)]
        ts: Option<i64>,
    },
}

// ============================================================================
// Server -> client
// ============================================================================

/// Typing indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingState {
    Start,
    Stop,
}

/// Presence state, derived from session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "ready")]
    Ready {
        session_id: String,
        heartbeat_ms: u64,
        server_time: String,
        capabilities: Vec<String>,
    },
    #[serde(rename = "ping")]
    Ping {
        ts: i64,
    },
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
    },
    #[serde(rename = "event.message.create")]
    MessageCreate {
        message: MessageView,
    },
    #[serde(rename = "event.message.edit")]
    MessageEdit {
        message: MessageView,
    },
    #[serde(rename = "event.message.delete")]
    MessageDelete {
        message_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        dm_peer_id: Option<String>,
        #[serde(with = "ts_ms")]
        ts: i64,
    },
    #[serde(rename = "event.reaction.add")]
    ReactionAdd {
        message_id: String,
        emoji: String,
        counts: Vec<ReactionCount>,
    },
    #[serde(rename = "event.reaction.remove")]
    ReactionRemove {
        message_id: String,
        emoji: String,
        counts: Vec<ReactionCount>,
    },
    #[serde(rename = "event.pin.add")]
    PinAdd {
        room_id: String,
        message_id: String,
    },
    #[serde(rename = "event.pin.remove")]
    PinRemove {
        room_id: String,
        message_id: String,
    },
    #[serde(rename = "event.typing")]
    Typing {
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        dm_peer_id: Option<String>,
        user_id: String,
        state: TypingState,
    },
    #[serde(rename = "event.presence")]
    Presence {
        user_id: String,
        state: PresenceState,
    },
}

impl ServerFrame {
    /// The error frame for a core error, for in-band WS failures.
    pub fn error(err: &crate::error::CoreError) -> Self {
        Self::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }

    /// Convert a canonical stream event into its wire frame.
    pub fn from_event(event: &StreamEvent) -> Self {
        match event {
            StreamEvent::MessageCreated { message } => {
                Self::MessageCreate { message: message.clone() }
            }
            StreamEvent::MessageEdited { message } => {
                Self::MessageEdit { message: message.clone() }
            }
            StreamEvent::MessageDeleted { message_id, room_id, dm_peer_id, ts_ms } => {
                Self::MessageDelete {
                    message_id: message_id.clone(),
                    room_id: room_id.clone(),
                    dm_peer_id: dm_peer_id.clone(),
                    ts: *ts_ms,
                }
            }
            StreamEvent::ReactionAdded { message_id, emoji, counts } => Self::ReactionAdd {
                message_id: message_id.clone(),
                emoji: emoji.clone(),
                counts: counts.clone(),
            },
            StreamEvent::ReactionRemoved { message_id, emoji, counts } => Self::ReactionRemove {
                message_id: message_id.clone(),
                emoji: emoji.clone(),
                counts: counts.clone(),
            },
        }
    }
}

// ============================================================================
// Cursor keys
// ============================================================================

/// A parsed `ack` cursor key: `room:<name-or-id>` or `dm:<user_id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorKey {
    Room(String),
    Dm(String),
}

impl CursorKey {
    /// Parse an inbound cursor key. Returns `None` for unknown prefixes.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(key) = raw.strip_prefix("room:") {
            return Some(Self::Room(key.to_string()));
        }
        raw.strip_prefix("dm:").map(|id| Self::Dm(id.to_string()))
    }

    /// The canonical outbound form: rooms are keyed by name.
    pub fn encode_room(name: &str) -> String {
        format!("room:{name}")
    }

    pub fn encode_dm(user_id: &str) -> String {
        format!("dm:{user_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_hello_parses() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"hello","subscriptions":{"rooms":["general"],"dms":true},"cursors":{"room:general":4}}"#,
        )
        .expect("parse");
        let ClientFrame::Hello { subscriptions, cursors } = frame else {
            panic!("expected hello")
        };
        assert_eq!(subscriptions.rooms, vec!["general"]);
        assert!(subscriptions.dms);
        assert_eq!(cursors.get("room:general"), Some(&4));
    }

    #[test]
    fn test_client_frame_defaults() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"hello"}"#).expect("parse");
        let ClientFrame::Hello { subscriptions, cursors } = frame else {
            panic!("expected hello")
        };
        assert!(subscriptions.rooms.is_empty());
        assert!(!subscriptions.dms);
        assert!(cursors.is_empty());
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_server_frame_tags() {
        let frame = ServerFrame::Ready {
            session_id: "s1".into(),
            heartbeat_ms: 30_000,
            server_time: "2026-01-01T00:00:00.000Z".into(),
            capabilities: vec!["reactions".into()],
        };
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["type"], "ready");
        assert_eq!(json["heartbeat_ms"], 30_000);

        let frame = ServerFrame::PinAdd { room_id: "r1".into(), message_id: "m1".into() };
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["type"], "event.pin.add");
    }

    #[test]
    fn test_cursor_key_parse() {
        assert_eq!(
            CursorKey::parse("room:general"),
            Some(CursorKey::Room("general".into()))
        );
        assert_eq!(CursorKey::parse("dm:abc"), Some(CursorKey::Dm("abc".into())));
        assert_eq!(CursorKey::parse("stream:abc"), None);
        assert_eq!(CursorKey::encode_room("general"), "room:general");
    }
}
