//! Stream ordering invariants under concurrency, driven through the
//! orchestrator the way the HTTP layer drives it.

use orcd::config::Config;
use orcd::ops::Orchestrator;
use orcd::state::types::Visibility;
use orcd::state::Core;
use std::sync::Arc;

fn orchestrator() -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(Arc::new(Core::new(Config::default()))))
}

fn login(ops: &Orchestrator, name: &str) -> String {
    ops.guest_login(Some(name.to_string())).expect("login").1.user_id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_posters_get_gap_free_sequence() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    let bob = login(&ops, "bob");
    ops.create_room(&alice, "general", Visibility::Public, "")
        .expect("room");
    ops.join_room(&bob, "general").expect("join");

    // two concurrent posters issue 50 posts each into the same room
    let mut tasks = Vec::new();
    for poster in [alice.clone(), bob.clone()] {
        let ops = Arc::clone(&ops);
        tasks.push(tokio::spawn(async move {
            for i in 0..50 {
                ops.post_room_message(
                    &poster,
                    "general",
                    format!("{poster} {i}"),
                    "text/plain".into(),
                    None,
                    Vec::new(),
                )
                .expect("post");
            }
        }));
    }
    for task in tasks {
        task.await.expect("poster task");
    }

    let (messages, next_seq) = ops
        .room_messages(&alice, "general", 1, 200)
        .expect("read");
    assert_eq!(messages.len(), 100);
    assert_eq!(next_seq, 101);

    // seq = 1..=100 exactly once each, ts non-decreasing with seq
    let mut last_ts = 0;
    for (i, message) in messages.iter().enumerate() {
        assert_eq!(message.seq, (i + 1) as u64, "gap or duplicate at {i}");
        assert!(message.ts >= last_ts, "ts ran backwards at seq {}", message.seq);
        last_ts = message.ts;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cursor_advances_keep_max() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    ops.create_room(&alice, "general", Visibility::Public, "")
        .expect("room");

    let mut tasks = Vec::new();
    for seq in [3u64, 9, 5, 7, 1, 9, 2] {
        let ops = Arc::clone(&ops);
        let alice = alice.clone();
        tasks.push(tokio::spawn(async move {
            ops.room_ack(&alice, "general", seq).expect("ack");
        }));
    }
    for task in tasks {
        task.await.expect("ack task");
    }
    assert_eq!(ops.room_cursor(&alice, "general").expect("cursor"), 9);
}

#[tokio::test]
async fn forward_read_round_trip_in_order() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    ops.create_room(&alice, "general", Visibility::Public, "")
        .expect("room");
    for i in 0..25 {
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
    let (messages, _) = ops.room_messages(&alice, "general", 1, 25).expect("read");
    for (i, message) in messages.iter().enumerate() {
        assert_eq!(message.text, format!("m{i}"));
        assert_eq!(message.seq, (i + 1) as u64);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reactions_count_each_user_once() {
    let ops = orchestrator();
    let alice = login(&ops, "alice");
    ops.create_room(&alice, "general", Visibility::Public, "")
        .expect("room");
    let message = ops
        .post_room_message(
            &alice,
            "general",
            "react".into(),
            "text/plain".into(),
            None,
            Vec::new(),
        )
        .expect("post");

    let mut users = Vec::new();
    for i in 0..10 {
        let user = login(&ops, &format!("user{i}"));
        ops.join_room(&user, "general").expect("join");
        users.push(user);
    }

    let mut tasks = Vec::new();
    for user in &users {
        // each user double-taps the same emoji concurrently
        for _ in 0..2 {
            let ops = Arc::clone(&ops);
            let user = user.clone();
            let message_id = message.message_id.clone();
            tasks.push(tokio::spawn(async move {
                ops.react(&user, &message_id, "🔥", true).expect("react");
            }));
        }
    }
    for task in tasks {
        task.await.expect("react task");
    }

    let view = ops
        .react(&alice, &message.message_id, "🔥", true)
        .expect("final react");
    assert_eq!(view.reactions.len(), 1);
    assert_eq!(view.reactions[0].count, 11, "10 users + alice, once each");
}
