//! Subscription hub: indexes live WebSocket sessions and fans events out.
//!
//! Fan-out never blocks. Each event is serialized once, shared as an
//! `Arc<str>`, and offered to every subscribed session's bounded outbound
//! queue with `try_send`. A full or closed queue affects only that
//! session: it gets flagged for teardown and the publish continues.
//!
//! Index traversal snapshots the recipient set before sending, so the
//! shard locks are never held across a send.

use crate::rtm::frames::ServerFrame;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why a session is being torn down by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Outbound queue overflowed; client must reconnect and backfill.
    SlowConsumer,
}

/// Sender half of a live session, registered on attach.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub user_id: String,
    /// Bounded outbound frame queue, drained by the session task.
    pub frames_tx: mpsc::Sender<Arc<str>>,
    /// Teardown signal; capacity 1, fire-and-forget.
    pub close_tx: mpsc::Sender<CloseReason>,
}

struct SessionEntry {
    handle: SessionHandle,
    rooms: HashSet<String>,
    dms: bool,
}

/// Live session indexes.
pub struct Hub {
    /// room_id -> subscribed session ids
    by_room: DashMap<String, HashSet<String>>,
    /// user_id -> session ids enrolled in that user's DMs
    by_dm_user: DashMap<String, HashSet<String>>,
    sessions: DashMap<String, SessionEntry>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            by_room: DashMap::new(),
            by_dm_user: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    /// Register or re-register a session with its subscription set.
    ///
    /// Idempotent: rooms already subscribed stay subscribed, rooms missing
    /// from `rooms` are dropped, and DM enrollment follows `dms`.
    pub fn attach(&self, handle: SessionHandle, rooms: HashSet<String>, dms: bool) {
        let session_id = handle.session_id.clone();
        let user_id = handle.user_id.clone();

        let previous = self.sessions.insert(
            session_id.clone(),
            SessionEntry { handle, rooms: rooms.clone(), dms },
        );
        let old_rooms = previous.as_ref().map(|e| e.rooms.clone()).unwrap_or_default();
        let was_new = previous.is_none();

        for room_id in old_rooms.difference(&rooms) {
            if let Some(mut set) = self.by_room.get_mut(room_id) {
                set.remove(&session_id);
            }
        }
        for room_id in &rooms {
            self.by_room
                .entry(room_id.clone())
                .or_default()
                .insert(session_id.clone());
        }

        if dms {
            self.by_dm_user
                .entry(user_id)
                .or_default()
                .insert(session_id.clone());
        } else if let Some(mut set) = self.by_dm_user.get_mut(&user_id) {
            set.remove(&session_id);
        }

        if was_new {
            crate::metrics::OPEN_SESSIONS.inc();
        }
    }

    /// Remove a session from every index. Idempotent.
    pub fn detach(&self, session_id: &str) {
        let Some((_, entry)) = self.sessions.remove(session_id) else {
            return;
        };
        for room_id in &entry.rooms {
            if let Some(mut set) = self.by_room.get_mut(room_id) {
                set.remove(session_id);
            }
        }
        if let Some(mut set) = self.by_dm_user.get_mut(&entry.handle.user_id) {
            set.remove(session_id);
        }
        crate::metrics::OPEN_SESSIONS.dec();
    }

    /// Whether a session is currently attached.
    pub fn is_attached(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Sessions subscribed to a room. Test and introspection helper.
    pub fn room_subscribers(&self, room_id: &str) -> usize {
        self.by_room.get(room_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Send an event to every session subscribed to `room_id`.
    pub fn publish_room(&self, room_id: &str, frame: &ServerFrame) {
        let recipients = self.snapshot(self.by_room.get(room_id).map(|s| s.clone()));
        self.deliver(recipients, frame);
    }

    /// Send an event to every session enrolled in either user's DMs.
    pub fn publish_dm(&self, user_a: &str, user_b: &str, frame: &ServerFrame) {
        let mut recipients = self
            .by_dm_user
            .get(user_a)
            .map(|s| s.clone())
            .unwrap_or_default();
        if let Some(more) = self.by_dm_user.get(user_b) {
            recipients.extend(more.iter().cloned());
        }
        self.deliver(recipients.into_iter().collect(), frame);
    }

    /// Send an event to every connected session (presence).
    pub fn publish_all(&self, frame: &ServerFrame) {
        let recipients: Vec<String> =
            self.sessions.iter().map(|e| e.key().clone()).collect();
        self.deliver(recipients, frame);
    }

    fn snapshot(&self, set: Option<HashSet<String>>) -> Vec<String> {
        set.map(|s| s.into_iter().collect()).unwrap_or_default()
    }

    fn deliver(&self, recipients: Vec<String>, frame: &ServerFrame) {
        if recipients.is_empty() {
            return;
        }
        let raw: Arc<str> = match serde_json::to_string(frame) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize event frame");
                return;
            }
        };
        crate::metrics::EVENTS_PUBLISHED.inc();
        crate::metrics::FANOUT_RECIPIENTS.observe(recipients.len() as f64);

        for session_id in recipients {
            let Some(entry) = self.sessions.get(&session_id) else {
                continue;
            };
            let handle = entry.handle.clone();
            drop(entry);

            match handle.frames_tx.try_send(Arc::clone(&raw)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        session_id = %session_id,
                        "outbound queue full, closing slow consumer"
                    );
                    crate::metrics::SLOW_CONSUMER_CLOSES.inc();
                    let _ = handle.close_tx.try_send(CloseReason::SlowConsumer);
                    self.detach(&session_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Session task already gone; drop the index entries.
                    self.detach(&session_id);
                }
            }
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtm::frames::ServerFrame;

    fn handle(session_id: &str, user_id: &str, buffer: usize) -> (SessionHandle, mpsc::Receiver<Arc<str>>, mpsc::Receiver<CloseReason>) {
        let (frames_tx, frames_rx) = mpsc::channel(buffer);
        let (close_tx, close_rx) = mpsc::channel(1);
        (
            SessionHandle {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                frames_tx,
                close_tx,
            },
            frames_rx,
            close_rx,
        )
    }

    fn ping() -> ServerFrame {
        ServerFrame::Ping { ts: 0 }
    }

    fn rooms(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_room_fanout_reaches_subscribers_once() {
        let hub = Hub::new();
        let (h1, mut rx1, _c1) = handle("s1", "u1", 8);
        let (h2, mut rx2, _c2) = handle("s2", "u2", 8);
        hub.attach(h1, rooms(&["r1"]), false);
        hub.attach(h2, rooms(&["r1", "r2"]), false);

        hub.publish_room("r1", &ping());
        assert!(rx1.try_recv().is_ok());
        assert!(rx1.try_recv().is_err(), "at most one frame per publish");
        assert!(rx2.try_recv().is_ok());

        hub.publish_room("r2", &ping());
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_reattach_updates_subscriptions() {
        let hub = Hub::new();
        let (h1, mut rx1, _c1) = handle("s1", "u1", 8);
        hub.attach(h1.clone(), rooms(&["r1", "r2"]), false);
        assert_eq!(hub.room_subscribers("r1"), 1);

        // hello again with a smaller set drops r2
        hub.attach(h1, rooms(&["r1"]), true);
        assert_eq!(hub.room_subscribers("r2"), 0);
        hub.publish_room("r2", &ping());
        assert!(rx1.try_recv().is_err());
        hub.publish_room("r1", &ping());
        assert!(rx1.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_dm_fanout_covers_both_parties() {
        let hub = Hub::new();
        let (ha, mut rxa, _ca) = handle("sa", "alice", 8);
        let (hb, mut rxb, _cb) = handle("sb", "bob", 8);
        let (hc, mut rxc, _cc) = handle("sc", "carol", 8);
        hub.attach(ha, HashSet::new(), true);
        hub.attach(hb, HashSet::new(), true);
        hub.attach(hc, HashSet::new(), true);

        hub.publish_dm("alice", "bob", &ping());
        assert!(rxa.try_recv().is_ok());
        assert!(rxb.try_recv().is_ok());
        assert!(rxc.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_consumer_does_not_affect_others() {
        let hub = Hub::new();
        let (slow, _rx_kept_full, mut slow_close) = handle("slow", "u1", 1);
        let (fast, mut fast_rx, _cf) = handle("fast", "u2", 8);
        hub.attach(slow, rooms(&["r1"]), false);
        hub.attach(fast, rooms(&["r1"]), false);

        hub.publish_room("r1", &ping()); // fills the slow queue
        hub.publish_room("r1", &ping()); // overflows it

        assert_eq!(slow_close.try_recv().ok(), Some(CloseReason::SlowConsumer));
        assert!(!hub.is_attached("slow"));
        // the fast session saw both frames
        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_detach_idempotent() {
        let hub = Hub::new();
        let (h1, _rx, _c) = handle("s1", "u1", 8);
        hub.attach(h1, rooms(&["r1"]), true);
        hub.detach("s1");
        hub.detach("s1");
        assert_eq!(hub.room_subscribers("r1"), 0);
        hub.publish_dm("u1", "u2", &ping());
    }

    #[tokio::test]
    async fn test_publish_all() {
        let hub = Hub::new();
        let (h1, mut rx1, _c1) = handle("s1", "u1", 8);
        let (h2, mut rx2, _c2) = handle("s2", "u2", 8);
        hub.attach(h1, HashSet::new(), false);
        hub.attach(h2, rooms(&["r1"]), false);
        hub.publish_all(&ping());
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
