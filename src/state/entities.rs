//! Entity store: users, rooms, memberships, moderation sets and uploads.
//!
//! All indexes are DashMaps. Mutations go through named operations; readers
//! get cloned snapshots that are safe to serialize without further locking.
//!
//! # Lock discipline
//!
//! Cross-index operations (e.g. `create_room` touching both the name index
//! and the id index) insert into the uniqueness-bearing index first via the
//! entry API, so a conflicting writer observes the reservation before any
//! other state exists. Never hold a guard from one map while mutating
//! another in the opposite order.

use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::state::types::{
    Role, RoomRecord, User, Visibility, now_ms, MAX_BIO, MAX_DISPLAY_NAME, MAX_STATUS_TEXT,
};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A stored blob with its sniffed/declared mime type.
#[derive(Debug, Clone)]
pub struct Blob {
    pub mime: String,
    pub bytes: Arc<Vec<u8>>,
}

/// Membership entry with join ordering, so "longest-standing" promotion
/// is well defined.
#[derive(Debug, Clone, Copy)]
pub struct Membership {
    pub role: Role,
    pub joined_at: i64,
}

/// Authoritative entity indexes.
pub struct EntityStore {
    users_by_id: DashMap<String, User>,
    rooms_by_id: DashMap<String, RoomRecord>,
    /// lowercased name -> room_id; the uniqueness authority for names.
    rooms_by_name_lower: DashMap<String, String>,
    /// room_id -> (user_id -> membership)
    members: DashMap<String, HashMap<String, Membership>>,
    /// room_id -> banned user ids
    bans: DashMap<String, HashSet<String>>,
    /// room_id -> muted user ids
    mutes: DashMap<String, HashSet<String>>,
    uploads_by_cid: DashMap<String, Blob>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            users_by_id: DashMap::new(),
            rooms_by_id: DashMap::new(),
            rooms_by_name_lower: DashMap::new(),
            members: DashMap::new(),
            bans: DashMap::new(),
            mutes: DashMap::new(),
            uploads_by_cid: DashMap::new(),
        }
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Create a user. Called on guest login; users are never destroyed.
    pub fn create_user(&self, display_name: &str) -> CoreResult<User> {
        validate_display_name(display_name)?;
        let user = User {
            user_id: ids::entity_id(),
            display_name: display_name.to_string(),
            photo_cid: None,
            bio: None,
            status_text: None,
            status_emoji: None,
        };
        self.users_by_id.insert(user.user_id.clone(), user.clone());
        Ok(user)
    }

    pub fn user(&self, user_id: &str) -> Option<User> {
        self.users_by_id.get(user_id).map(|u| u.clone())
    }

    /// Look up a user by exact display name (guest login reuse).
    pub fn user_by_display_name(&self, display_name: &str) -> Option<User> {
        self.users_by_id
            .iter()
            .find(|u| u.display_name == display_name)
            .map(|u| u.clone())
    }

    /// Apply a profile patch; `None` fields are left untouched.
    pub fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> CoreResult<User> {
        let mut user = self
            .users_by_id
            .get_mut(user_id)
            .ok_or(CoreError::NotFound("user"))?;
        if let Some(name) = patch.display_name {
            validate_display_name(&name)?;
            user.display_name = name;
        }
        if let Some(bio) = patch.bio {
            if bio.len() > MAX_BIO {
                return Err(CoreError::bad_request("bio too long"));
            }
            user.bio = Some(bio);
        }
        if let Some(status_text) = patch.status_text {
            if status_text.len() > MAX_STATUS_TEXT {
                return Err(CoreError::bad_request("status_text too long"));
            }
            user.status_text = Some(status_text);
        }
        if let Some(status_emoji) = patch.status_emoji {
            user.status_emoji = Some(status_emoji);
        }
        if let Some(photo_cid) = patch.photo_cid {
            if !self.uploads_by_cid.contains_key(&photo_cid) {
                return Err(CoreError::NotFound("upload"));
            }
            user.photo_cid = Some(photo_cid);
        }
        Ok(user.clone())
    }

    /// Substring search over display names for the public directory.
    pub fn search_users(&self, query: &str, limit: usize) -> Vec<User> {
        let needle = query.to_lowercase();
        self.users_by_id
            .iter()
            .filter(|u| u.display_name.to_lowercase().contains(&needle))
            .take(limit)
            .map(|u| u.clone())
            .collect()
    }

    // ========================================================================
    // Rooms
    // ========================================================================

    /// Create a room. Fails with `conflict` if the case-folded name is
    /// taken. The creator becomes the sole member with the `owner` role.
    pub fn create_room(
        &self,
        owner_id: &str,
        name: &str,
        visibility: Visibility,
        topic: &str,
    ) -> CoreResult<RoomRecord> {
        validate_room_name(name)?;
        let room_id = ids::entity_id();

        // Reserve the name first; the entry API makes the uniqueness check
        // and the reservation one atomic step.
        match self.rooms_by_name_lower.entry(name.to_lowercase()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(CoreError::Conflict),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(room_id.clone());
            }
        }

        let record = RoomRecord {
            room_id: room_id.clone(),
            name: name.to_string(),
            topic: topic.to_string(),
            visibility,
            owner_id: owner_id.to_string(),
            created_at: now_ms(),
            pinned_message_ids: Vec::new(),
        };
        self.rooms_by_id.insert(room_id.clone(), record.clone());
        self.members.insert(
            room_id,
            HashMap::from([(
                owner_id.to_string(),
                Membership { role: Role::Owner, joined_at: now_ms() },
            )]),
        );
        crate::metrics::ROOMS.inc();
        Ok(record)
    }

    /// Rename a room, atomically re-checking name uniqueness and moving the
    /// name index entry.
    pub fn rename_room(&self, room_id: &str, new_name: &str) -> CoreResult<RoomRecord> {
        validate_room_name(new_name)?;
        let mut room = self
            .rooms_by_id
            .get_mut(room_id)
            .ok_or(CoreError::NotFound("room"))?;

        let old_lower = room.name.to_lowercase();
        let new_lower = new_name.to_lowercase();
        if old_lower != new_lower {
            match self.rooms_by_name_lower.entry(new_lower) {
                dashmap::mapref::entry::Entry::Occupied(_) => return Err(CoreError::Conflict),
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(room_id.to_string());
                }
            }
            self.rooms_by_name_lower.remove(&old_lower);
        }
        room.name = new_name.to_string();
        Ok(room.clone())
    }

    /// Update topic and/or visibility.
    pub fn update_room(
        &self,
        room_id: &str,
        topic: Option<String>,
        visibility: Option<Visibility>,
    ) -> CoreResult<RoomRecord> {
        let mut room = self
            .rooms_by_id
            .get_mut(room_id)
            .ok_or(CoreError::NotFound("room"))?;
        if let Some(topic) = topic {
            room.topic = topic;
        }
        if let Some(visibility) = visibility {
            room.visibility = visibility;
        }
        Ok(room.clone())
    }

    pub fn room(&self, room_id: &str) -> Option<RoomRecord> {
        self.rooms_by_id.get(room_id).map(|r| r.clone())
    }

    pub fn room_by_name(&self, name: &str) -> Option<RoomRecord> {
        let room_id = self.rooms_by_name_lower.get(&name.to_lowercase())?;
        self.room(&room_id)
    }

    /// Resolve a path key that may be either a room name or a room id.
    ///
    /// Names win: only a key that doesn't resolve as a name and has the
    /// exact entity-id shape is tried against the id index.
    pub fn resolve_room_key(&self, key: &str) -> Option<RoomRecord> {
        if let Some(room) = self.room_by_name(key) {
            return Some(room);
        }
        if ids::looks_like_entity_id(key) {
            return self.room(key);
        }
        None
    }

    /// Pin a message id. Idempotent; caller has already checked the message
    /// belongs to this room.
    pub fn pin_message(&self, room_id: &str, message_id: &str) -> CoreResult<()> {
        let mut room = self
            .rooms_by_id
            .get_mut(room_id)
            .ok_or(CoreError::NotFound("room"))?;
        if !room.pinned_message_ids.iter().any(|m| m == message_id) {
            room.pinned_message_ids.push(message_id.to_string());
        }
        Ok(())
    }

    pub fn unpin_message(&self, room_id: &str, message_id: &str) -> CoreResult<()> {
        let mut room = self
            .rooms_by_id
            .get_mut(room_id)
            .ok_or(CoreError::NotFound("room"))?;
        room.pinned_message_ids.retain(|m| m != message_id);
        Ok(())
    }

    /// Substring search over room names; private rooms stay hidden.
    pub fn search_rooms(&self, query: &str, limit: usize) -> Vec<RoomRecord> {
        let needle = query.to_lowercase();
        self.rooms_by_id
            .iter()
            .filter(|r| r.visibility == Visibility::Public)
            .filter(|r| r.name.to_lowercase().contains(&needle))
            .take(limit)
            .map(|r| r.clone())
            .collect()
    }

    /// Rooms the user is a member of.
    pub fn rooms_of(&self, user_id: &str) -> Vec<RoomRecord> {
        self.members
            .iter()
            .filter(|entry| entry.value().contains_key(user_id))
            .filter_map(|entry| self.room(entry.key()))
            .collect()
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Add a member. Idempotent: re-adding preserves the existing role.
    pub fn add_member(&self, room_id: &str, user_id: &str, role: Role) -> CoreResult<()> {
        if !self.rooms_by_id.contains_key(room_id) {
            return Err(CoreError::NotFound("room"));
        }
        self.members
            .entry(room_id.to_string())
            .or_default()
            .entry(user_id.to_string())
            .or_insert(Membership { role, joined_at: now_ms() });
        Ok(())
    }

    /// Remove a member. Idempotent; returns whether the user was present.
    pub fn remove_member(&self, room_id: &str, user_id: &str) -> bool {
        self.members
            .get_mut(room_id)
            .map(|mut members| members.remove(user_id).is_some())
            .unwrap_or(false)
    }

    pub fn membership(&self, room_id: &str, user_id: &str) -> Option<Membership> {
        self.members
            .get(room_id)?
            .get(user_id)
            .copied()
    }

    pub fn role(&self, room_id: &str, user_id: &str) -> Option<Role> {
        self.membership(room_id, user_id).map(|m| m.role)
    }

    pub fn is_member(&self, room_id: &str, user_id: &str) -> bool {
        self.membership(room_id, user_id).is_some()
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.members.get(room_id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn member_ids(&self, room_id: &str) -> Vec<String> {
        self.members
            .get(room_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Assign a role. Only the owner may assign `owner`; doing so demotes
    /// the previous owner to admin so exactly one owner remains.
    pub fn set_role(
        &self,
        room_id: &str,
        caller_id: &str,
        user_id: &str,
        role: Role,
    ) -> CoreResult<()> {
        let caller_role = self
            .role(room_id, caller_id)
            .ok_or_else(|| CoreError::forbidden("not a member of this room"))?;
        if role == Role::Owner && caller_role != Role::Owner {
            return Err(CoreError::forbidden("only the owner may transfer ownership"));
        }
        if !caller_role.can_administrate() {
            return Err(CoreError::forbidden("admin role required"));
        }

        let mut members = self
            .members
            .get_mut(room_id)
            .ok_or(CoreError::NotFound("room"))?;
        if !members.contains_key(user_id) {
            return Err(CoreError::NotFound("member"));
        }
        if role == Role::Owner {
            if let Some(previous) = members.get_mut(caller_id) {
                previous.role = Role::Admin;
            }
        }
        if let Some(membership) = members.get_mut(user_id) {
            membership.role = role;
        }
        drop(members);

        if role == Role::Owner {
            if let Some(mut room) = self.rooms_by_id.get_mut(room_id) {
                room.owner_id = user_id.to_string();
            }
        }
        Ok(())
    }

    /// The longest-standing member holding the highest role below owner,
    /// for owner-leave auto-promotion.
    pub fn promotion_candidate(&self, room_id: &str, leaving: &str) -> Option<String> {
        let members = self.members.get(room_id)?;
        members
            .iter()
            .filter(|(user_id, _)| user_id.as_str() != leaving)
            .max_by(|(_, a), (_, b)| {
                a.role.cmp(&b.role).then(b.joined_at.cmp(&a.joined_at))
            })
            .map(|(user_id, _)| user_id.clone())
    }

    // ========================================================================
    // Moderation sets
    // ========================================================================

    pub fn ban(&self, room_id: &str, user_id: &str) {
        self.bans
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    pub fn is_banned(&self, room_id: &str, user_id: &str) -> bool {
        self.bans
            .get(room_id)
            .map(|b| b.contains(user_id))
            .unwrap_or(false)
    }

    pub fn mute(&self, room_id: &str, user_id: &str) {
        self.mutes
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    pub fn unmute(&self, room_id: &str, user_id: &str) {
        if let Some(mut m) = self.mutes.get_mut(room_id) {
            m.remove(user_id);
        }
    }

    pub fn is_muted(&self, room_id: &str, user_id: &str) -> bool {
        self.mutes
            .get(room_id)
            .map(|m| m.contains(user_id))
            .unwrap_or(false)
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    /// Store a blob, deduplicating by content id.
    pub fn put_blob(&self, bytes: Vec<u8>, mime_hint: &str) -> crate::state::types::UploadMeta {
        let cid = ids::cid_for(&bytes);
        let sha256 = ids::sha256_hex(&bytes);
        let meta = crate::state::types::UploadMeta {
            cid: cid.clone(),
            bytes: bytes.len(),
            mime: mime_hint.to_string(),
            sha256,
        };
        self.uploads_by_cid
            .entry(cid)
            .or_insert_with(|| Blob { mime: mime_hint.to_string(), bytes: Arc::new(bytes) });
        meta
    }

    pub fn get_blob(&self, cid: &str) -> Option<Blob> {
        self.uploads_by_cid.get(cid).map(|b| b.clone())
    }

    pub fn has_blob(&self, cid: &str) -> bool {
        self.uploads_by_cid.contains_key(cid)
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable profile fields for `PATCH /users/me`.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub photo_cid: Option<String>,
    pub bio: Option<String>,
    pub status_text: Option<String>,
    pub status_emoji: Option<String>,
}

fn validate_display_name(name: &str) -> CoreResult<()> {
    if name.is_empty() || name.len() > MAX_DISPLAY_NAME {
        return Err(CoreError::bad_request("display_name must be 1..=128 chars"));
    }
    Ok(())
}

fn validate_room_name(name: &str) -> CoreResult<()> {
    if name.is_empty() || name.len() > 80 {
        return Err(CoreError::bad_request("room name must be 1..=80 chars"));
    }
    if name.contains('/') || name.contains(char::is_whitespace) {
        return Err(CoreError::bad_request("room name may not contain spaces or '/'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_room() -> (EntityStore, RoomRecord) {
        let store = EntityStore::new();
        let owner = store.create_user("alice").expect("user");
        let room = store
            .create_room(&owner.user_id, "general", Visibility::Public, "hello")
            .expect("room");
        (store, room)
    }

    #[test]
    fn test_room_name_conflict_case_insensitive() {
        let (store, _room) = store_with_room();
        let err = store
            .create_room("someone", "GENERAL", Visibility::Public, "")
            .expect_err("conflict expected");
        assert!(matches!(err, CoreError::Conflict));
    }

    #[test]
    fn test_room_resolution_by_name_and_id() {
        let (store, room) = store_with_room();
        assert_eq!(
            store.resolve_room_key("General").map(|r| r.room_id),
            Some(room.room_id.clone())
        );
        assert_eq!(
            store.resolve_room_key(&room.room_id).map(|r| r.room_id),
            Some(room.room_id)
        );
        assert!(store.resolve_room_key("nonexistent").is_none());
    }

    #[test]
    fn test_member_count_tracks_membership() {
        let (store, room) = store_with_room();
        assert_eq!(store.member_count(&room.room_id), 1);
        store.add_member(&room.room_id, "u2", Role::Member).expect("add");
        store.add_member(&room.room_id, "u3", Role::Member).expect("add");
        assert_eq!(store.member_count(&room.room_id), 3);
        // idempotent re-add
        store.add_member(&room.room_id, "u2", Role::Guest).expect("add");
        assert_eq!(store.member_count(&room.room_id), 3);
        assert_eq!(store.role(&room.room_id, "u2"), Some(Role::Member));

        assert!(store.remove_member(&room.room_id, "u2"));
        assert!(!store.remove_member(&room.room_id, "u2"));
        assert_eq!(store.member_count(&room.room_id), 2);
    }

    #[test]
    fn test_rename_atomically_moves_name_index() {
        let (store, room) = store_with_room();
        store.rename_room(&room.room_id, "lounge").expect("rename");
        assert!(store.room_by_name("general").is_none());
        assert_eq!(
            store.room_by_name("LOUNGE").map(|r| r.room_id),
            Some(room.room_id.clone())
        );
        // the old name is free again
        store
            .create_room("someone", "general", Visibility::Public, "")
            .expect("name should be free");
    }

    #[test]
    fn test_rename_to_own_name_changes_case() {
        let (store, room) = store_with_room();
        let renamed = store.rename_room(&room.room_id, "General").expect("rename");
        assert_eq!(renamed.name, "General");
        assert!(store.room_by_name("general").is_some());
    }

    #[test]
    fn test_only_owner_assigns_owner() {
        let (store, room) = store_with_room();
        store.add_member(&room.room_id, "u2", Role::Admin).expect("add");
        store.add_member(&room.room_id, "u3", Role::Member).expect("add");

        let err = store
            .set_role(&room.room_id, "u2", "u3", Role::Owner)
            .expect_err("admin must not assign owner");
        assert!(matches!(err, CoreError::Forbidden(_)));

        let owner = store.room(&room.room_id).expect("room").owner_id;
        store
            .set_role(&room.room_id, &owner, "u2", Role::Owner)
            .expect("owner transfer");
        assert_eq!(store.role(&room.room_id, "u2"), Some(Role::Owner));
        // previous owner demoted, exactly one owner remains
        assert_eq!(store.role(&room.room_id, &owner), Some(Role::Admin));
        assert_eq!(store.room(&room.room_id).expect("room").owner_id, "u2");
    }

    #[test]
    fn test_promotion_candidate_prefers_role_then_tenure() {
        let (store, room) = store_with_room();
        let owner = room.owner_id.clone();
        store.add_member(&room.room_id, "m1", Role::Member).expect("add");
        store.add_member(&room.room_id, "a1", Role::Admin).expect("add");
        assert_eq!(
            store.promotion_candidate(&room.room_id, &owner).as_deref(),
            Some("a1")
        );
    }

    #[test]
    fn test_blob_dedup() {
        let store = EntityStore::new();
        let a = store.put_blob(b"hello".to_vec(), "text/plain");
        let b = store.put_blob(b"hello".to_vec(), "image/png");
        assert_eq!(a.cid, b.cid);
        // first write wins for stored mime
        assert_eq!(store.get_blob(&a.cid).expect("blob").mime, "text/plain");
    }

    #[test]
    fn test_bans_and_mutes() {
        let (store, room) = store_with_room();
        store.ban(&room.room_id, "u9");
        assert!(store.is_banned(&room.room_id, "u9"));
        store.mute(&room.room_id, "u8");
        assert!(store.is_muted(&room.room_id, "u8"));
        store.unmute(&room.room_id, "u8");
        assert!(!store.is_muted(&room.room_id, "u8"));
    }
}
