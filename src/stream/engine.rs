//! The stream engine: per-stream ordered logs, sequence allocation,
//! cursors and reaction state.
//!
//! Each stream's state sits behind its own `parking_lot::Mutex`. The
//! orchestrator holds that lock across mutate-and-publish, which is safe
//! because publication is a non-blocking `try_send` fan-out; this is what
//! linearizes seq allocation with event order inside one stream. Across
//! streams there is no ordering and no shared lock.

use crate::config::LimitsConfig;
use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::state::types::now_ms;
use crate::stream::types::{
    Attachment, MessageRecord, MessageView, ReactionCount, ReactionView, StreamEvent, StreamKey,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Arguments for posting a message.
#[derive(Debug)]
pub struct PostArgs {
    pub author_id: String,
    /// Recipient relative to the author, for DM streams.
    pub dm_to: Option<String>,
    pub text: String,
    pub content_type: String,
    pub parent_id: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// All mutable state of one stream. Owned by the engine, mutated only
/// through these operations while the stream mutex is held.
pub struct StreamState {
    key: StreamKey,
    /// Append-only log; `messages[i].seq == floor_seq + 1 + i`.
    messages: Vec<MessageRecord>,
    /// Next sequence number to allocate. Starts at 1.
    next_seq: u64,
    /// Highest retention-pruned seq; 0 when nothing was pruned.
    floor_seq: u64,
    /// Monotonic timestamp floor: `ts = max(now, last_ts)`.
    last_ts_ms: i64,
    /// user_id -> last acknowledged seq.
    cursors: HashMap<String, u64>,
    /// message_id -> emoji -> reacting users. First-class reaction state;
    /// the public `reactions` array is derived from it on read.
    reactions: HashMap<String, BTreeMap<String, BTreeSet<String>>>,
    limits: LimitsConfig,
}

impl StreamState {
    fn new(key: StreamKey, limits: LimitsConfig) -> Self {
        Self {
            key,
            messages: Vec::new(),
            next_seq: 1,
            floor_seq: 0,
            last_ts_ms: 0,
            cursors: HashMap::new(),
            reactions: HashMap::new(),
            limits,
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    fn record_by_id(&self, message_id: &str) -> Option<&MessageRecord> {
        self.messages.iter().find(|m| m.message_id == message_id)
    }

    fn record_by_id_mut(&mut self, message_id: &str) -> Option<&mut MessageRecord> {
        self.messages.iter_mut().find(|m| m.message_id == message_id)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a message: allocates the next seq, stamps a timestamp that
    /// never runs backwards within the stream, and returns the canonical
    /// creation event.
    pub fn post(&mut self, args: PostArgs) -> CoreResult<StreamEvent> {
        if args.text.len() > self.limits.max_message_bytes {
            return Err(CoreError::bad_request("text exceeds max_message_bytes"));
        }
        if args.text.is_empty() && args.attachments.is_empty() {
            return Err(CoreError::bad_request("message has no content"));
        }
        if let Some(parent_id) = &args.parent_id {
            if self.record_by_id(parent_id).is_none() {
                return Err(CoreError::bad_request("parent_id not in this stream"));
            }
        }

        let ts_ms = now_ms().max(self.last_ts_ms);
        self.last_ts_ms = ts_ms;
        let seq = self.next_seq;
        self.next_seq += 1;

        let record = MessageRecord {
            message_id: ids::entity_id(),
            author_id: args.author_id,
            dm_to: args.dm_to,
            seq,
            ts_ms,
            parent_id: args.parent_id,
            content_type: args.content_type,
            text: args.text,
            attachments: args.attachments,
            tombstone: false,
            edited_at_ms: None,
            moderation_reason: None,
        };
        self.messages.push(record.clone());
        let message = self.view_of(&record, None);
        Ok(StreamEvent::MessageCreated { message })
    }

    /// Edit text/attachments. Authorized iff the caller authored the
    /// message; seq and ts are unchanged.
    pub fn edit(
        &mut self,
        message_id: &str,
        caller_id: &str,
        text: Option<String>,
        attachments: Option<Vec<Attachment>>,
    ) -> CoreResult<StreamEvent> {
        let max_bytes = self.limits.max_message_bytes;
        let record = self
            .record_by_id_mut(message_id)
            .ok_or(CoreError::NotFound("message"))?;
        if record.author_id != caller_id {
            return Err(CoreError::forbidden("only the author may edit"));
        }
        if record.tombstone {
            return Err(CoreError::forbidden("message is deleted"));
        }
        if let Some(text) = text {
            if text.len() > max_bytes {
                return Err(CoreError::bad_request("text exceeds max_message_bytes"));
            }
            record.text = text;
        }
        if let Some(attachments) = attachments {
            record.attachments = attachments;
        }
        record.edited_at_ms = Some(now_ms());
        let record = record.clone();
        let message = self.view_of(&record, None);
        Ok(StreamEvent::MessageEdited { message })
    }

    /// Tombstone a message, preserving its sequence position. `can_purge`
    /// is the caller's moderation permission in the containing room.
    pub fn tombstone(
        &mut self,
        message_id: &str,
        caller_id: &str,
        can_purge: bool,
        reason: Option<String>,
    ) -> CoreResult<StreamEvent> {
        let record = self
            .record_by_id_mut(message_id)
            .ok_or(CoreError::NotFound("message"))?;
        if record.author_id != caller_id && !can_purge {
            return Err(CoreError::forbidden("not your message"));
        }
        record.tombstone = true;
        record.moderation_reason = reason;
        let dm_to = record.dm_to.clone();
        let (room_id, dm_peer_id) = match &self.key {
            StreamKey::Room(id) => (Some(id.clone()), None),
            StreamKey::Dm(..) => (None, dm_to),
        };
        Ok(StreamEvent::MessageDeleted {
            message_id: message_id.to_string(),
            room_id,
            dm_peer_id,
            ts_ms: now_ms(),
        })
    }

    /// Add or remove a reaction. Adding is idempotent per (user, emoji);
    /// the emitted event carries the full reaction summary.
    pub fn react(
        &mut self,
        message_id: &str,
        caller_id: &str,
        emoji: &str,
        add: bool,
    ) -> CoreResult<StreamEvent> {
        let max_emojis = self.limits.max_reactions_per_message;
        {
            let record = self
                .record_by_id(message_id)
                .ok_or(CoreError::NotFound("message"))?;
            if record.tombstone {
                return Err(CoreError::forbidden("message is deleted"));
            }
        }

        let by_emoji = self.reactions.entry(message_id.to_string()).or_default();
        if add {
            if !by_emoji.contains_key(emoji) && by_emoji.len() >= max_emojis {
                return Err(CoreError::bad_request("too many distinct reactions"));
            }
            by_emoji
                .entry(emoji.to_string())
                .or_default()
                .insert(caller_id.to_string());
        } else if let Some(users) = by_emoji.get_mut(emoji) {
            users.remove(caller_id);
            if users.is_empty() {
                by_emoji.remove(emoji);
            }
        }

        let counts = self.reaction_counts(message_id);
        let event = if add {
            StreamEvent::ReactionAdded {
                message_id: message_id.to_string(),
                emoji: emoji.to_string(),
                counts,
            }
        } else {
            StreamEvent::ReactionRemoved {
                message_id: message_id.to_string(),
                emoji: emoji.to_string(),
                counts,
            }
        };
        Ok(event)
    }

    /// Discard all messages with `seq <= floor`. Subsequent reads below
    /// the floor surface `history_pruned`.
    pub fn prune_to(&mut self, floor: u64) -> usize {
        let floor = floor.min(self.next_seq.saturating_sub(1));
        if floor <= self.floor_seq {
            return 0;
        }
        let drop_count = (floor - self.floor_seq) as usize;
        for record in self.messages.drain(..drop_count.min(self.messages.len())) {
            self.reactions.remove(&record.message_id);
        }
        self.floor_seq = floor;
        drop_count
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Messages with `seq >= from_seq`, ascending, at most `limit`.
    /// Returns the slice and the `next_seq` to resume from.
    pub fn forward_read(
        &self,
        viewer: Option<&str>,
        from_seq: u64,
        limit: usize,
    ) -> CoreResult<(Vec<MessageView>, u64)> {
        if self.floor_seq > 0 && from_seq <= self.floor_seq {
            return Err(CoreError::HistoryPruned);
        }
        let start = from_seq.max(self.floor_seq + 1);
        let slice: Vec<MessageView> = self
            .messages
            .iter()
            .skip_while(|m| m.seq < start)
            .take(limit)
            .map(|m| self.view_of(m, viewer))
            .collect();
        let next = slice.last().map(|m| m.seq + 1).unwrap_or(self.next_seq);
        Ok((slice, next))
    }

    /// The last `limit` messages with `seq < before_seq`, in ascending
    /// order. Returns the slice and `prev_seq` (first seq in the slice,
    /// or 0 when empty).
    pub fn backfill_read(
        &self,
        viewer: Option<&str>,
        before_seq: u64,
        limit: usize,
    ) -> CoreResult<(Vec<MessageView>, u64)> {
        if self.floor_seq > 0 && before_seq <= self.floor_seq + 1 {
            return Err(CoreError::HistoryPruned);
        }
        let upto = self
            .messages
            .iter()
            .take_while(|m| m.seq < before_seq)
            .count();
        let start = upto.saturating_sub(limit);
        let slice: Vec<MessageView> = self.messages[start..upto]
            .iter()
            .map(|m| self.view_of(m, viewer))
            .collect();
        let prev = slice.first().map(|m| m.seq).unwrap_or(0);
        Ok((slice, prev))
    }

    /// A single message by id, as seen by `viewer`.
    pub fn message_view(&self, message_id: &str, viewer: Option<&str>) -> Option<MessageView> {
        self.record_by_id(message_id).map(|m| self.view_of(m, viewer))
    }

    // ========================================================================
    // Cursors
    // ========================================================================

    /// Advance a user's cursor. Monotonic: only ever moves forward.
    pub fn set_cursor(&mut self, user_id: &str, seq: u64) {
        let entry = self.cursors.entry(user_id.to_string()).or_insert(0);
        *entry = (*entry).max(seq);
    }

    pub fn cursor(&self, user_id: &str) -> u64 {
        self.cursors.get(user_id).copied().unwrap_or(0)
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Reaction summary for events: every emoji with its count.
    pub fn reaction_counts(&self, message_id: &str) -> Vec<ReactionCount> {
        self.reactions
            .get(message_id)
            .map(|by_emoji| {
                by_emoji
                    .iter()
                    .map(|(emoji, users)| ReactionCount {
                        emoji: emoji.clone(),
                        count: users.len(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Produce the external view of a record. This is the only path out of
    /// the engine: tombstoned messages leave with text, attachments and
    /// reactions blanked no matter what the record retains.
    fn view_of(&self, record: &MessageRecord, viewer: Option<&str>) -> MessageView {
        let (room_id, dm_peer_id) = match &self.key {
            StreamKey::Room(id) => (Some(id.clone()), None),
            StreamKey::Dm(..) => (None, record.dm_to.clone()),
        };
        let reactions = if record.tombstone {
            Vec::new()
        } else {
            self.reactions
                .get(&record.message_id)
                .map(|by_emoji| {
                    by_emoji
                        .iter()
                        .map(|(emoji, users)| ReactionView {
                            emoji: emoji.clone(),
                            count: users.len(),
                            me: viewer.is_some_and(|v| users.contains(v)),
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        MessageView {
            message_id: record.message_id.clone(),
            room_id,
            dm_peer_id,
            author_id: record.author_id.clone(),
            seq: record.seq,
            ts: record.ts_ms,
            parent_id: record.parent_id.clone(),
            content_type: record.content_type.clone(),
            text: if record.tombstone { String::new() } else { record.text.clone() },
            attachments: if record.tombstone { Vec::new() } else { record.attachments.clone() },
            reactions,
            tombstone: record.tombstone,
            edited_at: record.edited_at_ms,
            moderation_reason: record.moderation_reason.clone(),
        }
    }
}

/// Engine-level state: the stream table and the global message locator.
pub struct StreamEngine {
    streams: DashMap<StreamKey, Arc<Mutex<StreamState>>>,
    /// message_id -> owning stream, for `/messages/{id}` addressing.
    message_index: DashMap<String, StreamKey>,
    limits: LimitsConfig,
}

impl StreamEngine {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            streams: DashMap::new(),
            message_index: DashMap::new(),
            limits,
        }
    }

    /// Get or create the stream for `key`.
    pub fn stream(&self, key: &StreamKey) -> Arc<Mutex<StreamState>> {
        self.streams
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(StreamState::new(key.clone(), self.limits.clone())))
            })
            .clone()
    }

    /// Look up the stream owning `message_id`.
    pub fn locate_message(&self, message_id: &str) -> Option<StreamKey> {
        self.message_index
            .get(message_id)
            .map(|entry| entry.value().clone())
    }

    /// Register a freshly posted message in the global locator. Called by
    /// the orchestrator while it still holds the stream lock.
    pub fn index_message(&self, message_id: &str, key: &StreamKey) {
        self.message_index
            .insert(message_id.to_string(), key.clone());
    }
}
