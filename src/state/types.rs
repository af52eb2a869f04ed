//! Wire and domain types for users, rooms, memberships and uploads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format Unix milliseconds as RFC 3339 UTC with millisecond precision.
pub fn format_ts(ms: i64) -> String {
    let secs = ms.div_euclid(1000);
    let nanos = (ms.rem_euclid(1000) as u32) * 1_000_000;
    if let Some(dt) = DateTime::<Utc>::from_timestamp(secs, nanos) {
        dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    } else {
        "1970-01-01T00:00:00.000Z".to_string()
    }
}

/// Serde adapter: `i64` Unix milliseconds on the inside, RFC 3339 `Z`
/// strings on the wire.
pub mod ts_ms {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ms: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_ts(*ms))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
            .map_err(serde::de::Error::custom)
    }
}

/// Same adapter for optional timestamps (`edited_at`).
pub mod ts_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ms: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match ms {
            Some(ms) => serializer.serialize_some(&super::format_ts(*ms)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            None => Ok(None),
            Some(s) => chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| Some(dt.timestamp_millis()))
                .map_err(serde::de::Error::custom),
        }
    }
}

// ============================================================================
// Users
// ============================================================================

/// A user profile. `user_id` is immutable; everything else is mutable by
/// the owning user via `PATCH /users/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_emoji: Option<String>,
}

/// Field limits from the data model.
pub const MAX_DISPLAY_NAME: usize = 128;
pub const MAX_BIO: usize = 1024;
pub const MAX_STATUS_TEXT: usize = 80;

// ============================================================================
// Rooms and membership
// ============================================================================

/// Room visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

/// Membership role, ordered by precedence.
///
/// The derived `Ord` follows declaration order, so
/// `Guest < Member < Moderator < Admin < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    Member,
    Moderator,
    Admin,
    Owner,
}

impl Role {
    /// Whether this role may tombstone other users' messages.
    pub fn can_purge_messages(self) -> bool {
        self >= Role::Moderator
    }

    /// Whether this role may manage membership (invite, kick, ban, mute)
    /// and pins.
    pub fn can_moderate(self) -> bool {
        self >= Role::Moderator
    }

    /// Whether this role may change room metadata and assign roles
    /// below owner.
    pub fn can_administrate(self) -> bool {
        self >= Role::Admin
    }
}

/// Internal room record. The wire object is [`Room`], produced by the
/// entity store with `member_count` derived from the membership map.
#[derive(Debug, Clone)]
pub struct RoomRecord {
    pub room_id: String,
    /// Stored casing preserved; uniqueness is on the lowercased form.
    pub name: String,
    pub topic: String,
    pub visibility: Visibility,
    pub owner_id: String,
    pub created_at: i64,
    pub pinned_message_ids: Vec<String>,
}

/// Room as serialized to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub name: String,
    pub topic: String,
    pub visibility: Visibility,
    pub owner_id: String,
    #[serde(with = "ts_ms")]
    pub created_at: i64,
    pub member_count: usize,
    pub pinned_message_ids: Vec<String>,
}

impl RoomRecord {
    /// Produce the wire view given the current membership cardinality.
    pub fn to_view(&self, member_count: usize) -> Room {
        Room {
            room_id: self.room_id.clone(),
            name: self.name.clone(),
            topic: self.topic.clone(),
            visibility: self.visibility,
            owner_id: self.owner_id.clone(),
            created_at: self.created_at,
            member_count,
            pinned_message_ids: self.pinned_message_ids.clone(),
        }
    }
}

// ============================================================================
// Uploads
// ============================================================================

/// Metadata for a stored blob, returned by `POST /uploads`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMeta {
    pub cid: String,
    pub bytes: usize,
    pub mime: String,
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_precedence() {
        assert!(Role::Owner > Role::Admin);
        assert!(Role::Admin > Role::Moderator);
        assert!(Role::Moderator > Role::Member);
        assert!(Role::Member > Role::Guest);
    }

    #[test]
    fn test_role_permissions() {
        assert!(Role::Moderator.can_purge_messages());
        assert!(!Role::Member.can_purge_messages());
        assert!(Role::Owner.can_administrate());
        assert!(!Role::Moderator.can_administrate());
    }

    #[test]
    fn test_format_ts_millis() {
        assert_eq!(format_ts(1_700_000_000_123), "2023-11-14T22:13:20.123Z");
        assert_eq!(format_ts(0), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_ts_serde_round_trip() {
        #[derive(Serialize, Deserialize)]
        struct T {
            #[serde(with = "ts_ms")]
            ts: i64,
        }
        let t = T { ts: 1_700_000_000_500 };
        let json = serde_json::to_string(&t).expect("serialize");
        assert!(json.contains("2023-11-14T22:13:20.500Z"), "got {json}");
        let back: T = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.ts, 1_700_000_000_500);
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Moderator).expect("ser"), "\"moderator\"");
        let r: Role = serde_json::from_str("\"owner\"").expect("de");
        assert_eq!(r, Role::Owner);
    }
}
