//! Stream, message and event types.
//!
//! A stream is a logical ordered message container: either a room or a
//! canonical DM pair. Messages are stored as [`MessageRecord`]s and only
//! ever leave the process as [`MessageView`]s, which is where tombstone
//! blanking and reaction summaries are applied.

use crate::state::types::{ts_ms, ts_ms_opt};
use serde::{Deserialize, Serialize};

// ============================================================================
// Stream identity
// ============================================================================

/// Key identifying one stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKey {
    /// Room stream, keyed by room id.
    Room(String),
    /// DM stream, keyed by the unordered user pair. Always canonical:
    /// `.0 <= .1`. Construct via [`StreamKey::dm`].
    Dm(String, String),
}

impl StreamKey {
    pub fn room(room_id: impl Into<String>) -> Self {
        Self::Room(room_id.into())
    }

    /// Canonical DM key for an unordered user pair.
    pub fn dm(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b { Self::Dm(a, b) } else { Self::Dm(b, a) }
    }

    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::Room(id) => Some(id),
            Self::Dm(..) => None,
        }
    }

    /// The two DM participants, if this is a DM stream.
    pub fn dm_pair(&self) -> Option<(&str, &str)> {
        match self {
            Self::Room(_) => None,
            Self::Dm(a, b) => Some((a, b)),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// An attachment reference: a content-addressed upload plus display hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub cid: String,
    pub mime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Internal message record. Tombstoned messages keep their original text
/// in memory for moderation; [`MessageRecord::view`] is the only path to
/// the outside and blanks it.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub message_id: String,
    pub author_id: String,
    /// For DM messages, the recipient as addressed by the author.
    pub dm_to: Option<String>,
    pub seq: u64,
    pub ts_ms: i64,
    pub parent_id: Option<String>,
    pub content_type: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub tombstone: bool,
    pub edited_at_ms: Option<i64>,
    pub moderation_reason: Option<String>,
}

/// One emoji's aggregate on a message, as carried by reaction events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: usize,
}

/// One emoji's aggregate as seen by a specific caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionView {
    pub emoji: String,
    pub count: usize,
    pub me: bool,
}

/// Message as serialized to clients. Exactly one of `room_id` /
/// `dm_peer_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dm_peer_id: Option<String>,
    pub author_id: String,
    pub seq: u64,
    #[serde(with = "ts_ms")]
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub content_type: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<ReactionView>,
    pub tombstone: bool,
    #[serde(default, with = "ts_ms_opt", skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderation_reason: Option<String>,
}

// ============================================================================
// Events
// ============================================================================

/// Canonical event produced by a stream mutation, handed to the hub for
/// fan-out. Message payloads are viewer-neutral (`me` is never set).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MessageCreated { message: MessageView },
    MessageEdited { message: MessageView },
    MessageDeleted {
        message_id: String,
        room_id: Option<String>,
        dm_peer_id: Option<String>,
        ts_ms: i64,
    },
    ReactionAdded { message_id: String, emoji: String, counts: Vec<ReactionCount> },
    ReactionRemoved { message_id: String, emoji: String, counts: Vec<ReactionCount> },
}
