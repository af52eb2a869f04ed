//! Operation orchestrator.
//!
//! Every externally visible operation runs the same template:
//! authorize, validate, mutate, publish. The publish step happens while
//! the mutated stream's lock is still held, so subscribers observe events
//! in exactly the order sequence numbers were allocated. Publication is
//! non-blocking fan-out, which is what makes holding the lock safe.

use crate::config::OwnerLeavePolicy;
use crate::error::{CoreError, CoreResult};
use crate::hub::SessionHandle;
use crate::rtm::frames::{CursorKey, PresenceState, ServerFrame, Subscriptions, TypingState};
use crate::state::types::{Role, Room, RoomRecord, User, Visibility};
use crate::state::{Core, ProfilePatch};
use crate::stream::{Attachment, MessageView, PostArgs, StreamEvent, StreamKey};
use crate::telemetry::OpTimer;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The thin layer between transports and the core components.
pub struct Orchestrator {
    core: Arc<Core>,
}

impl Orchestrator {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Issue a guest token, creating or reusing the named user.
    pub fn guest_login(&self, username: Option<String>) -> CoreResult<(String, User)> {
        let _timer = OpTimer::new("guest_login");
        let user = match username {
            Some(name) => match self.core.entities.user_by_display_name(&name) {
                Some(user) => user,
                None => self.core.entities.create_user(&name)?,
            },
            None => {
                let suffix: u32 = rand::thread_rng().gen_range(10_000..100_000);
                self.core.entities.create_user(&format!("guest-{suffix}"))?
            }
        };
        let token = self.core.identity.issue_token(&user.user_id);
        tracing::info!(user_id = %user.user_id, "guest login");
        Ok((token, user))
    }

    /// Resolve a bearer token to its user.
    pub fn authenticate(&self, token: &str) -> CoreResult<User> {
        let user_id = self
            .core
            .identity
            .resolve(token)
            .ok_or(CoreError::Unauthorized)?;
        self.core
            .entities
            .user(&user_id)
            .ok_or(CoreError::Unauthorized)
    }

    pub fn mint_ticket(&self, user_id: &str) -> (String, u64) {
        self.core.identity.mint_ticket(user_id)
    }

    pub fn logout(&self, token: &str) {
        self.core.identity.revoke(token);
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> CoreResult<User> {
        self.core.entities.update_profile(user_id, patch)
    }

    pub fn search_users(&self, query: &str, limit: usize) -> Vec<User> {
        self.core.entities.search_users(query, limit)
    }

    pub fn search_rooms(&self, query: &str, limit: usize) -> Vec<Room> {
        self.core
            .entities
            .search_rooms(query, limit)
            .into_iter()
            .map(|r| self.room_view(&r))
            .collect()
    }

    // ========================================================================
    // Rooms
    // ========================================================================

    fn room_view(&self, record: &RoomRecord) -> Room {
        record.to_view(self.core.entities.member_count(&record.room_id))
    }

    /// Resolve a room path key (name or id), 404 on miss.
    pub fn resolve_room(&self, key: &str) -> CoreResult<RoomRecord> {
        self.core
            .entities
            .resolve_room_key(key)
            .ok_or(CoreError::NotFound("room"))
    }

    fn require_role(&self, room_id: &str, user_id: &str) -> CoreResult<Role> {
        self.core
            .entities
            .role(room_id, user_id)
            .ok_or_else(|| CoreError::forbidden("not a member of this room"))
    }

    pub fn create_room(
        &self,
        caller: &str,
        name: &str,
        visibility: Visibility,
        topic: &str,
    ) -> CoreResult<Room> {
        let _timer = OpTimer::new("create_room");
        let record = self.core.entities.create_room(caller, name, visibility, topic)?;
        tracing::info!(room_id = %record.room_id, name = %record.name, "room created");
        Ok(self.room_view(&record))
    }

    pub fn get_room(&self, caller: &str, key: &str) -> CoreResult<Room> {
        let record = self.resolve_room(key)?;
        if record.visibility == Visibility::Private
            && !self.core.entities.is_member(&record.room_id, caller)
        {
            return Err(CoreError::NotFound("room"));
        }
        Ok(self.room_view(&record))
    }

    /// Update room metadata; renames re-check name uniqueness atomically.
    pub fn update_room(
        &self,
        caller: &str,
        key: &str,
        name: Option<String>,
        topic: Option<String>,
        visibility: Option<Visibility>,
    ) -> CoreResult<Room> {
        let record = self.resolve_room(key)?;
        if !self.require_role(&record.room_id, caller)?.can_administrate() {
            return Err(CoreError::forbidden("admin role required"));
        }
        if let Some(name) = name {
            self.core.entities.rename_room(&record.room_id, &name)?;
        }
        let record = self
            .core
            .entities
            .update_room(&record.room_id, topic, visibility)?;
        Ok(self.room_view(&record))
    }

    pub fn my_rooms(&self, caller: &str) -> Vec<Room> {
        self.core
            .entities
            .rooms_of(caller)
            .iter()
            .map(|r| self.room_view(r))
            .collect()
    }

    pub fn join_room(&self, caller: &str, key: &str) -> CoreResult<Room> {
        let _timer = OpTimer::new("join_room");
        let record = self.resolve_room(key)?;
        if self.core.entities.is_banned(&record.room_id, caller) {
            return Err(CoreError::forbidden("banned from this room"));
        }
        if record.visibility == Visibility::Private
            && !self.core.entities.is_member(&record.room_id, caller)
        {
            return Err(CoreError::forbidden("room is invite-only"));
        }
        self.core.entities.add_member(&record.room_id, caller, Role::Member)?;
        Ok(self.room_view(&record))
    }

    /// Leave a room. Owner leave follows the configured policy: refuse, or
    /// promote the longest-standing highest-ranked member.
    pub fn leave_room(&self, caller: &str, key: &str) -> CoreResult<()> {
        let record = self.resolve_room(key)?;
        let role = match self.core.entities.role(&record.room_id, caller) {
            Some(role) => role,
            None => return Ok(()), // leaving a room you're not in is a no-op
        };
        if role == Role::Owner {
            match self.core.config.rooms.owner_leave {
                OwnerLeavePolicy::Forbid => {
                    return Err(CoreError::forbidden(
                        "transfer ownership before leaving",
                    ));
                }
                OwnerLeavePolicy::Promote => {
                    let heir = self
                        .core
                        .entities
                        .promotion_candidate(&record.room_id, caller)
                        .ok_or_else(|| {
                            CoreError::forbidden("sole member cannot leave an owned room")
                        })?;
                    self.core
                        .entities
                        .set_role(&record.room_id, caller, &heir, Role::Owner)?;
                    tracing::info!(
                        room_id = %record.room_id,
                        new_owner = %heir,
                        "owner left, promoted successor"
                    );
                }
            }
        }
        self.core.entities.remove_member(&record.room_id, caller);
        Ok(())
    }

    pub fn invite(&self, caller: &str, key: &str, user_id: &str) -> CoreResult<()> {
        let record = self.resolve_room(key)?;
        if !self.require_role(&record.room_id, caller)?.can_moderate() {
            return Err(CoreError::forbidden("moderator role required"));
        }
        if self.core.entities.user(user_id).is_none() {
            return Err(CoreError::NotFound("user"));
        }
        self.core.entities.add_member(&record.room_id, user_id, Role::Member)
    }

    pub fn kick(&self, caller: &str, key: &str, user_id: &str) -> CoreResult<()> {
        let record = self.resolve_room(key)?;
        if !self.require_role(&record.room_id, caller)?.can_moderate() {
            return Err(CoreError::forbidden("moderator role required"));
        }
        if self.core.entities.role(&record.room_id, user_id) == Some(Role::Owner) {
            return Err(CoreError::forbidden("cannot kick the owner"));
        }
        self.core.entities.remove_member(&record.room_id, user_id);
        Ok(())
    }

    pub fn ban(&self, caller: &str, key: &str, user_id: &str) -> CoreResult<()> {
        let record = self.resolve_room(key)?;
        if !self.require_role(&record.room_id, caller)?.can_moderate() {
            return Err(CoreError::forbidden("moderator role required"));
        }
        if self.core.entities.role(&record.room_id, user_id) == Some(Role::Owner) {
            return Err(CoreError::forbidden("cannot ban the owner"));
        }
        self.core.entities.ban(&record.room_id, user_id);
        self.core.entities.remove_member(&record.room_id, user_id);
        Ok(())
    }

    pub fn set_muted(&self, caller: &str, key: &str, user_id: &str, muted: bool) -> CoreResult<()> {
        let record = self.resolve_room(key)?;
        if !self.require_role(&record.room_id, caller)?.can_moderate() {
            return Err(CoreError::forbidden("moderator role required"));
        }
        if muted {
            self.core.entities.mute(&record.room_id, user_id);
        } else {
            self.core.entities.unmute(&record.room_id, user_id);
        }
        Ok(())
    }

    pub fn set_role(&self, caller: &str, key: &str, user_id: &str, role: Role) -> CoreResult<()> {
        let record = self.resolve_room(key)?;
        self.core.entities.set_role(&record.room_id, caller, user_id, role)
    }

    // ========================================================================
    // Pins
    // ========================================================================

    pub fn pin_message(&self, caller: &str, key: &str, message_id: &str) -> CoreResult<()> {
        let record = self.resolve_room(key)?;
        if !self.require_role(&record.room_id, caller)?.can_moderate() {
            return Err(CoreError::forbidden("moderator role required"));
        }
        // the pinned message must live in this room's stream
        match self.core.streams.locate_message(message_id) {
            Some(StreamKey::Room(room_id)) if room_id == record.room_id => {}
            _ => return Err(CoreError::NotFound("message")),
        }
        self.core.entities.pin_message(&record.room_id, message_id)?;
        self.core.hub.publish_room(
            &record.room_id,
            &ServerFrame::PinAdd {
                room_id: record.room_id.clone(),
                message_id: message_id.to_string(),
            },
        );
        Ok(())
    }

    pub fn unpin_message(&self, caller: &str, key: &str, message_id: &str) -> CoreResult<()> {
        let record = self.resolve_room(key)?;
        if !self.require_role(&record.room_id, caller)?.can_moderate() {
            return Err(CoreError::forbidden("moderator role required"));
        }
        self.core.entities.unpin_message(&record.room_id, message_id)?;
        self.core.hub.publish_room(
            &record.room_id,
            &ServerFrame::PinRemove {
                room_id: record.room_id.clone(),
                message_id: message_id.to_string(),
            },
        );
        Ok(())
    }

    // ========================================================================
    // Messages
    // ========================================================================

    fn validate_attachments(&self, attachments: &[Attachment]) -> CoreResult<()> {
        if attachments.len() > self.core.config.limits.max_attachments {
            return Err(CoreError::bad_request("too many attachments"));
        }
        for attachment in attachments {
            if !self.core.entities.has_blob(&attachment.cid) {
                return Err(CoreError::bad_request("attachment cid not uploaded"));
            }
        }
        Ok(())
    }

    /// Publish a stream event to its scope. Callers hold the stream lock.
    fn publish(&self, key: &StreamKey, event: &StreamEvent) {
        let frame = ServerFrame::from_event(event);
        match key {
            StreamKey::Room(room_id) => self.core.hub.publish_room(room_id, &frame),
            StreamKey::Dm(a, b) => self.core.hub.publish_dm(a, b, &frame),
        }
    }

    /// Post into a room stream.
    pub fn post_room_message(
        &self,
        caller: &str,
        key: &str,
        text: String,
        content_type: String,
        parent_id: Option<String>,
        attachments: Vec<Attachment>,
    ) -> CoreResult<MessageView> {
        let _timer = OpTimer::new("post_message");
        let record = self.resolve_room(key)?;
        self.require_role(&record.room_id, caller)?;
        if self.core.entities.is_muted(&record.room_id, caller) {
            return Err(CoreError::forbidden("you are muted in this room"));
        }
        self.validate_attachments(&attachments)?;

        let stream_key = StreamKey::room(record.room_id.clone());
        self.post_into(caller, None, stream_key, text, content_type, parent_id, attachments)
    }

    /// Post into a DM stream.
    pub fn post_dm_message(
        &self,
        caller: &str,
        peer_id: &str,
        text: String,
        content_type: String,
        parent_id: Option<String>,
        attachments: Vec<Attachment>,
    ) -> CoreResult<MessageView> {
        let _timer = OpTimer::new("post_message");
        if self.core.entities.user(peer_id).is_none() {
            return Err(CoreError::NotFound("user"));
        }
        self.validate_attachments(&attachments)?;

        let stream_key = StreamKey::dm(caller, peer_id);
        self.post_into(
            caller,
            Some(peer_id.to_string()),
            stream_key,
            text,
            content_type,
            parent_id,
            attachments,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn post_into(
        &self,
        caller: &str,
        dm_to: Option<String>,
        stream_key: StreamKey,
        text: String,
        content_type: String,
        parent_id: Option<String>,
        attachments: Vec<Attachment>,
    ) -> CoreResult<MessageView> {
        let stream = self.core.streams.stream(&stream_key);
        let mut state = stream.lock();
        let event = state.post(PostArgs {
            author_id: caller.to_string(),
            dm_to,
            text,
            content_type,
            parent_id,
            attachments,
        })?;
        let StreamEvent::MessageCreated { message } = &event else {
            return Err(CoreError::Internal("post produced a non-create event".into()));
        };
        self.core.streams.index_message(&message.message_id, &stream_key);
        self.publish(&stream_key, &event);
        let view = state
            .message_view(&message.message_id, Some(caller))
            .ok_or_else(|| CoreError::Internal("posted message vanished".into()))?;
        Ok(view)
    }

    /// Locate the stream containing `message_id` and check the caller can
    /// see it (room member or DM party).
    fn visible_stream_of(&self, caller: &str, message_id: &str) -> CoreResult<StreamKey> {
        let key = self
            .core
            .streams
            .locate_message(message_id)
            .ok_or(CoreError::NotFound("message"))?;
        match &key {
            StreamKey::Room(room_id) => {
                if !self.core.entities.is_member(room_id, caller) {
                    return Err(CoreError::NotFound("message"));
                }
            }
            StreamKey::Dm(a, b) => {
                if caller != a && caller != b {
                    return Err(CoreError::NotFound("message"));
                }
            }
        }
        Ok(key)
    }

    pub fn edit_message(
        &self,
        caller: &str,
        message_id: &str,
        text: Option<String>,
        attachments: Option<Vec<Attachment>>,
    ) -> CoreResult<MessageView> {
        let _timer = OpTimer::new("edit_message");
        if let Some(attachments) = &attachments {
            self.validate_attachments(attachments)?;
        }
        let key = self.visible_stream_of(caller, message_id)?;
        let stream = self.core.streams.stream(&key);
        let mut state = stream.lock();
        let event = state.edit(message_id, caller, text, attachments)?;
        self.publish(&key, &event);
        state
            .message_view(message_id, Some(caller))
            .ok_or_else(|| CoreError::Internal("edited message vanished".into()))
    }

    pub fn delete_message(
        &self,
        caller: &str,
        message_id: &str,
        reason: Option<String>,
    ) -> CoreResult<()> {
        let _timer = OpTimer::new("delete_message");
        let key = self.visible_stream_of(caller, message_id)?;
        let can_purge = match &key {
            StreamKey::Room(room_id) => self
                .core
                .entities
                .role(room_id, caller)
                .is_some_and(Role::can_purge_messages),
            StreamKey::Dm(..) => false,
        };
        let stream = self.core.streams.stream(&key);
        let mut state = stream.lock();
        let event = state.tombstone(message_id, caller, can_purge, reason)?;
        self.publish(&key, &event);
        Ok(())
    }

    /// Add or remove a reaction; returns the caller's view of the message.
    pub fn react(
        &self,
        caller: &str,
        message_id: &str,
        emoji: &str,
        add: bool,
    ) -> CoreResult<MessageView> {
        let _timer = OpTimer::new("react");
        if emoji.is_empty() || emoji.len() > 32 {
            return Err(CoreError::bad_request("invalid emoji"));
        }
        let key = self.visible_stream_of(caller, message_id)?;
        let stream = self.core.streams.stream(&key);
        let mut state = stream.lock();
        let event = state.react(message_id, caller, emoji, add)?;
        self.publish(&key, &event);
        state
            .message_view(message_id, Some(caller))
            .ok_or_else(|| CoreError::Internal("reacted message vanished".into()))
    }

    // ========================================================================
    // Reads and cursors
    // ========================================================================

    fn readable_room_stream(&self, caller: &str, key: &str) -> CoreResult<StreamKey> {
        let record = self.resolve_room(key)?;
        self.require_role(&record.room_id, caller)?;
        Ok(StreamKey::room(record.room_id))
    }

    pub fn room_messages(
        &self,
        caller: &str,
        key: &str,
        from_seq: u64,
        limit: usize,
    ) -> CoreResult<(Vec<MessageView>, u64)> {
        let stream_key = self.readable_room_stream(caller, key)?;
        let stream = self.core.streams.stream(&stream_key);
        let state = stream.lock();
        state.forward_read(Some(caller), from_seq.max(1), clamp_limit(limit))
    }

    pub fn room_backfill(
        &self,
        caller: &str,
        key: &str,
        before_seq: Option<u64>,
        limit: usize,
    ) -> CoreResult<(Vec<MessageView>, u64)> {
        let stream_key = self.readable_room_stream(caller, key)?;
        let stream = self.core.streams.stream(&stream_key);
        let state = stream.lock();
        let before = before_seq.unwrap_or_else(|| state.next_seq());
        state.backfill_read(Some(caller), before, clamp_limit(limit))
    }

    pub fn room_ack(&self, caller: &str, key: &str, seq: u64) -> CoreResult<()> {
        let stream_key = self.readable_room_stream(caller, key)?;
        let stream = self.core.streams.stream(&stream_key);
        stream.lock().set_cursor(caller, seq);
        Ok(())
    }

    pub fn room_cursor(&self, caller: &str, key: &str) -> CoreResult<u64> {
        let stream_key = self.readable_room_stream(caller, key)?;
        let stream = self.core.streams.stream(&stream_key);
        let cursor = stream.lock().cursor(caller);
        Ok(cursor)
    }

    fn dm_stream(&self, caller: &str, peer_id: &str) -> CoreResult<StreamKey> {
        if self.core.entities.user(peer_id).is_none() {
            return Err(CoreError::NotFound("user"));
        }
        Ok(StreamKey::dm(caller, peer_id))
    }

    pub fn dm_messages(
        &self,
        caller: &str,
        peer_id: &str,
        from_seq: u64,
        limit: usize,
    ) -> CoreResult<(Vec<MessageView>, u64)> {
        let stream_key = self.dm_stream(caller, peer_id)?;
        let stream = self.core.streams.stream(&stream_key);
        let state = stream.lock();
        state.forward_read(Some(caller), from_seq.max(1), clamp_limit(limit))
    }

    pub fn dm_backfill(
        &self,
        caller: &str,
        peer_id: &str,
        before_seq: Option<u64>,
        limit: usize,
    ) -> CoreResult<(Vec<MessageView>, u64)> {
        let stream_key = self.dm_stream(caller, peer_id)?;
        let stream = self.core.streams.stream(&stream_key);
        let state = stream.lock();
        let before = before_seq.unwrap_or_else(|| state.next_seq());
        state.backfill_read(Some(caller), before, clamp_limit(limit))
    }

    pub fn dm_ack(&self, caller: &str, peer_id: &str, seq: u64) -> CoreResult<()> {
        let stream_key = self.dm_stream(caller, peer_id)?;
        let stream = self.core.streams.stream(&stream_key);
        stream.lock().set_cursor(caller, seq);
        Ok(())
    }

    pub fn dm_cursor(&self, caller: &str, peer_id: &str) -> CoreResult<u64> {
        let stream_key = self.dm_stream(caller, peer_id)?;
        let stream = self.core.streams.stream(&stream_key);
        let cursor = stream.lock().cursor(caller);
        Ok(cursor)
    }

    /// Apply a WS `ack` cursor map. Unknown keys are skipped: acks are
    /// advisory and a stale room name must not poison the whole batch.
    pub fn apply_cursor_map(&self, caller: &str, cursors: &HashMap<String, u64>) {
        for (raw, seq) in cursors {
            match CursorKey::parse(raw) {
                Some(CursorKey::Room(key)) => {
                    if let Ok(stream_key) = self.readable_room_stream(caller, &key) {
                        let stream = self.core.streams.stream(&stream_key);
                        stream.lock().set_cursor(caller, *seq);
                    }
                }
                Some(CursorKey::Dm(peer_id)) => {
                    if let Ok(stream_key) = self.dm_stream(caller, &peer_id) {
                        let stream = self.core.streams.stream(&stream_key);
                        stream.lock().set_cursor(caller, *seq);
                    }
                }
                None => {
                    tracing::debug!(key = %raw, "ignoring unknown cursor key");
                }
            }
        }
    }

    // ========================================================================
    // Ephemeral events
    // ========================================================================

    /// Fan out a typing indicator for a room.
    pub fn room_typing(&self, caller: &str, key: &str, state: TypingState) -> CoreResult<()> {
        let record = self.resolve_room(key)?;
        self.require_role(&record.room_id, caller)?;
        self.core.hub.publish_room(
            &record.room_id,
            &ServerFrame::Typing {
                room_id: Some(record.room_id.clone()),
                dm_peer_id: None,
                user_id: caller.to_string(),
                state,
            },
        );
        Ok(())
    }

    /// Fan out a typing indicator for a DM.
    pub fn dm_typing(&self, caller: &str, peer_id: &str, state: TypingState) -> CoreResult<()> {
        if self.core.entities.user(peer_id).is_none() {
            return Err(CoreError::NotFound("user"));
        }
        self.core.hub.publish_dm(
            caller,
            peer_id,
            &ServerFrame::Typing {
                room_id: None,
                dm_peer_id: Some(caller.to_string()),
                user_id: caller.to_string(),
                state,
            },
        );
        Ok(())
    }

    // ========================================================================
    // Session lifecycle (called by the realtime layer)
    // ========================================================================

    /// Attach a session with the subscriptions named in `hello`, then apply
    /// any cursors it carried.
    pub fn attach_session(
        &self,
        handle: SessionHandle,
        subscriptions: &Subscriptions,
        cursors: &HashMap<String, u64>,
    ) {
        let user_id = handle.user_id.clone();
        let mut rooms = HashSet::new();
        for key in &subscriptions.rooms {
            match self.core.entities.resolve_room_key(key) {
                Some(record) if self.core.entities.is_member(&record.room_id, &user_id) => {
                    rooms.insert(record.room_id);
                }
                _ => {
                    tracing::debug!(key = %key, "skipping subscription to unavailable room");
                }
            }
        }
        self.core.hub.attach(handle, rooms, subscriptions.dms);
        self.apply_cursor_map(&user_id, cursors);
    }

    /// First attach on open: no subscriptions yet, presence goes out.
    pub fn session_opened(&self, handle: SessionHandle) {
        let user_id = handle.user_id.clone();
        self.core.hub.attach(handle, HashSet::new(), false);
        self.core.hub.publish_all(&ServerFrame::Presence {
            user_id,
            state: PresenceState::Online,
        });
    }

    pub fn session_closed(&self, session_id: &str, user_id: &str) {
        self.core.hub.detach(session_id);
        self.core.hub.publish_all(&ServerFrame::Presence {
            user_id: user_id.to_string(),
            state: PresenceState::Offline,
        });
    }
}

/// Read limits: default 50, cap 200. Zero means default.
fn clamp_limit(limit: usize) -> usize {
    match limit {
        0 => 50,
        n => n.min(200),
    }
}
