//! Mutate-then-publish semantics: what attached sessions actually see.

use orcd::config::Config;
use orcd::hub::{CloseReason, SessionHandle};
use orcd::ops::Orchestrator;
use orcd::rtm::frames::Subscriptions;
use orcd::state::types::Visibility;
use orcd::state::Core;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

fn orchestrator() -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(Arc::new(Core::new(Config::default()))))
}

fn login(ops: &Orchestrator, name: &str) -> String {
    ops.guest_login(Some(name.to_string())).expect("login").1.user_id
}

struct FakeSession {
    frames: mpsc::Receiver<Arc<str>>,
    _closes: mpsc::Receiver<CloseReason>,
}

impl FakeSession {
    /// Attach a synthetic session subscribed to `rooms` (names or ids).
    fn attach(ops: &Orchestrator, session_id: &str, user_id: &str, rooms: &[&str], dms: bool) -> Self {
        let (frames_tx, frames) = mpsc::channel(64);
        let (close_tx, closes) = mpsc::channel(1);
        let handle = SessionHandle {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            frames_tx,
            close_tx,
        };
        ops.attach_session(
            handle,
            &Subscriptions {
                rooms: rooms.iter().map(|r| r.to_string()).collect(),
                dms,
            },
            &HashMap::new(),
        );
        Self { frames, _closes: closes }
    }

    fn next(&mut self) -> Option<Value> {
        self.frames
            .try_recv()
            .ok()
            .map(|raw| serde_json::from_str(&raw).expect("frame json"))
    }
}

#[tokio::test]
async fn post_fans_out_to_room_subscribers_exactly_once() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    let bob = login(&ops, "bob");
    ops.create_room(&alice, "general", Visibility::Public, "")
        .expect("room");
    ops.join_room(&bob, "general").expect("join");

    let mut session_a = FakeSession::attach(&ops, "sa", &alice, &["general"], false);
    let mut session_b = FakeSession::attach(&ops, "sb", &bob, &["general"], false);

    let posted = ops
        .post_room_message(&alice, "general", "hi".into(), "text/plain".into(), None, Vec::new())
        .expect("post");
    assert_eq!(posted.seq, 1);

    for session in [&mut session_a, &mut session_b] {
        let frame = session.next().expect("one frame");
        assert_eq!(frame["type"], "event.message.create");
        assert_eq!(frame["message"]["seq"], 1);
        assert_eq!(frame["message"]["text"], "hi");
        assert!(session.next().is_none(), "at most one frame per event");
    }
}

#[tokio::test]
async fn per_stream_event_order_matches_seq_order() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    ops.create_room(&alice, "general", Visibility::Public, "")
        .expect("room");
    let mut session = FakeSession::attach(&ops, "s1", &alice, &["general"], false);

    for i in 0..20 {
        ops.post_room_message(
            &alice,
            "general",
            format!("m{i}"),
            "text/plain".into(),
            None,
            Vec::new(),
        )
        .expect("post");
    }

    let mut expected = 1;
    while let Some(frame) = session.next() {
        assert_eq!(frame["message"]["seq"], expected, "events out of order");
        expected += 1;
    }
    assert_eq!(expected, 21, "missing events");
}

#[tokio::test]
async fn non_subscriber_sees_nothing() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    let carol = login(&ops, "carol");
    ops.create_room(&alice, "general", Visibility::Public, "")
        .expect("room");
    ops.create_room(&carol, "other", Visibility::Public, "")
        .expect("room");

    let mut session = FakeSession::attach(&ops, "sc", &carol, &["other"], false);
    ops.post_room_message(&alice, "general", "hi".into(), "text/plain".into(), None, Vec::new())
        .expect("post");
    assert!(session.next().is_none());
}

#[tokio::test]
async fn edit_and_delete_events_follow_create() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    ops.create_room(&alice, "general", Visibility::Public, "")
        .expect("room");
    let mut session = FakeSession::attach(&ops, "s1", &alice, &["general"], false);

    let posted = ops
        .post_room_message(&alice, "general", "v1".into(), "text/plain".into(), None, Vec::new())
        .expect("post");
    ops.edit_message(&alice, &posted.message_id, Some("v2".into()), None)
        .expect("edit");
    ops.delete_message(&alice, &posted.message_id, None)
        .expect("delete");

    let create = session.next().expect("create");
    assert_eq!(create["type"], "event.message.create");
    let edit = session.next().expect("edit");
    assert_eq!(edit["type"], "event.message.edit");
    assert_eq!(edit["message"]["text"], "v2");
    let delete = session.next().expect("delete");
    assert_eq!(delete["type"], "event.message.delete");
    assert_eq!(delete["message_id"], posted.message_id.as_str());
    assert!(delete["room_id"].is_string());
}

#[tokio::test]
async fn reaction_events_carry_full_counts() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    let bob = login(&ops, "bob");
    ops.create_room(&alice, "general", Visibility::Public, "")
        .expect("room");
    ops.join_room(&bob, "general").expect("join");
    let posted = ops
        .post_room_message(&alice, "general", "x".into(), "text/plain".into(), None, Vec::new())
        .expect("post");

    let mut session = FakeSession::attach(&ops, "s1", &alice, &["general"], false);
    ops.react(&alice, &posted.message_id, "👍", true).expect("react");
    ops.react(&bob, &posted.message_id, "👍", true).expect("react");
    ops.react(&alice, &posted.message_id, "👍", false).expect("unreact");

    let first = session.next().expect("add 1");
    assert_eq!(first["type"], "event.reaction.add");
    assert_eq!(first["counts"][0]["count"], 1);
    let second = session.next().expect("add 2");
    assert_eq!(second["counts"][0]["count"], 2);
    let third = session.next().expect("remove");
    assert_eq!(third["type"], "event.reaction.remove");
    assert_eq!(third["counts"][0]["count"], 1);
}

#[tokio::test]
async fn dm_events_reach_both_parties_only() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    let bob = login(&ops, "bob");
    let carol = login(&ops, "carol");

    let mut session_a = FakeSession::attach(&ops, "sa", &alice, &[], true);
    let mut session_b = FakeSession::attach(&ops, "sb", &bob, &[], true);
    let mut session_c = FakeSession::attach(&ops, "sc", &carol, &[], true);

    ops.post_dm_message(&alice, &bob, "psst".into(), "text/plain".into(), None, Vec::new())
        .expect("dm");

    let frame = session_a.next().expect("author's session hears the dm");
    assert_eq!(frame["type"], "event.message.create");
    assert_eq!(frame["message"]["dm_peer_id"], bob.as_str());
    assert!(session_b.next().is_some());
    assert!(session_c.next().is_none());
}

#[tokio::test]
async fn pin_and_typing_events() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    ops.create_room(&alice, "general", Visibility::Public, "")
        .expect("room");
    let posted = ops
        .post_room_message(&alice, "general", "pin me".into(), "text/plain".into(), None, Vec::new())
        .expect("post");

    let mut session = FakeSession::attach(&ops, "s1", &alice, &["general"], false);
    ops.pin_message(&alice, "general", &posted.message_id).expect("pin");
    ops.unpin_message(&alice, "general", &posted.message_id).expect("unpin");
    ops.room_typing(&alice, "general", orcd::rtm::frames::TypingState::Start)
        .expect("typing");

    assert_eq!(session.next().expect("pin")["type"], "event.pin.add");
    assert_eq!(session.next().expect("unpin")["type"], "event.pin.remove");
    let typing = session.next().expect("typing");
    assert_eq!(typing["type"], "event.typing");
    assert_eq!(typing["state"], "start");
    assert_eq!(typing["user_id"], alice.as_str());

    let room = ops.get_room(&alice, "general").expect("room");
    assert!(room.pinned_message_ids.is_empty());
}

#[tokio::test]
async fn presence_goes_to_all_sessions() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    let bob = login(&ops, "bob");
    let mut session_a = FakeSession::attach(&ops, "sa", &alice, &[], false);

    // a second user's session opens and closes
    let (frames_tx, _frames) = mpsc::channel(8);
    let (close_tx, _closes) = mpsc::channel(1);
    let handle = SessionHandle {
        session_id: "sb".to_string(),
        user_id: bob.clone(),
        frames_tx,
        close_tx,
    };
    ops.session_opened(handle);
    ops.session_closed("sb", &bob);

    let online = session_a.next().expect("online presence");
    assert_eq!(online["type"], "event.presence");
    assert_eq!(online["state"], "online");
    assert_eq!(online["user_id"], bob.as_str());
    let offline = session_a.next().expect("offline presence");
    assert_eq!(offline["state"], "offline");
}

#[tokio::test]
async fn hello_cursors_advance_read_state() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    ops.create_room(&alice, "general", Visibility::Public, "")
        .expect("room");

    let (frames_tx, _frames) = mpsc::channel(8);
    let (close_tx, _closes) = mpsc::channel(1);
    let handle = SessionHandle {
        session_id: "s1".to_string(),
        user_id: alice.clone(),
        frames_tx,
        close_tx,
    };
    let mut cursors = HashMap::new();
    cursors.insert("room:general".to_string(), 5u64);
    cursors.insert("room:bogus".to_string(), 9u64); // unknown keys are skipped
    ops.attach_session(
        handle,
        &Subscriptions { rooms: vec!["general".into()], dms: false },
        &cursors,
    );
    assert_eq!(ops.room_cursor(&alice, "general").expect("cursor"), 5);
}
