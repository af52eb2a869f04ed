//! Per-connection realtime session.
//!
//! One task per WebSocket. The task owns both directions: it drains the
//! hub-fed outbound queue, parses inbound frames, and runs the heartbeat.
//! Two consecutive missed pongs, a transport error, a close frame or a
//! slow-consumer signal all land in the same terminal path: detach from
//! the hub, announce offline presence, drop the socket.

use crate::hub::{CloseReason, SessionHandle};
use crate::ops::Orchestrator;
use crate::rtm::frames::{ClientFrame, ServerFrame};
use crate::state::types::{format_ts, now_ms};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consecutive unanswered pings before the connection is dropped.
const MAX_MISSED_PINGS: u32 = 2;

/// Drive one authenticated WebSocket connection to completion.
pub async fn run(socket: WebSocket, ops: Arc<Orchestrator>, user_id: String) {
    let session_id = crate::ids::entity_id();
    let core = ops.core();
    let heartbeat = Duration::from_millis(core.config.rtm.heartbeat_ms.max(1));

    let (frames_tx, mut frames_rx) = mpsc::channel::<Arc<str>>(core.config.rtm.outbound_buffer);
    let (close_tx, mut close_rx) = mpsc::channel::<CloseReason>(1);
    let handle = SessionHandle {
        session_id: session_id.clone(),
        user_id: user_id.clone(),
        frames_tx,
        close_tx,
    };

    let (mut sender, mut receiver) = socket.split();

    // Register before `ready` so no event published after the handshake
    // can be missed.
    ops.session_opened(handle.clone());
    info!(session_id = %session_id, user_id = %user_id, "rtm session open");

    if send_frame(&mut sender, &ready_frame(&session_id, core)).await.is_err() {
        ops.session_closed(&session_id, &user_id);
        return;
    }

    // The first tick fires immediately, so a silent client is gone after
    // MAX_MISSED_PINGS full heartbeat periods.
    let mut heartbeat_timer = tokio::time::interval(heartbeat);
    let mut missed_pings: u32 = 0;

    loop {
        tokio::select! {
            // Hub fan-out -> socket
            frame = frames_rx.recv() => {
                let Some(raw) = frame else { break };
                if sender.send(Message::Text(raw.to_string().into())).await.is_err() {
                    debug!(session_id = %session_id, "send failed, closing");
                    break;
                }
            }

            // Teardown signal (slow consumer)
            reason = close_rx.recv() => {
                if let Some(CloseReason::SlowConsumer) = reason {
                    warn!(session_id = %session_id, "closing slow consumer");
                    let frame = ServerFrame::Error {
                        code: "slow_consumer".to_string(),
                        message: "outbound queue overflowed, reconnect and backfill".to_string(),
                    };
                    let _ = send_frame(&mut sender, &frame).await;
                }
                break;
            }

            // Heartbeat
            _ = heartbeat_timer.tick() => {
                if missed_pings >= MAX_MISSED_PINGS {
                    info!(session_id = %session_id, "heartbeat timeout, disconnecting");
                    break;
                }
                missed_pings += 1;
                if send_frame(&mut sender, &ServerFrame::Ping { ts: now_ms() }).await.is_err() {
                    break;
                }
            }

            // Inbound frames
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => {
                                let is_hello = matches!(frame, ClientFrame::Hello { .. });
                                handle_frame(&ops, &handle, frame, &mut missed_pings);
                                // re-emit ready after hello, per the handshake
                                if is_hello {
                                    let frame = ready_frame(&session_id, core);
                                    if send_frame(&mut sender, &frame).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                debug!(session_id = %session_id, error = %e, "bad client frame");
                                let frame = ServerFrame::Error {
                                    code: "bad_request".to_string(),
                                    message: format!("unparseable frame: {e}"),
                                };
                                if send_frame(&mut sender, &frame).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary and pong control frames are ignored
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "transport error");
                        break;
                    }
                }
            }
        }
    }

    ops.session_closed(&session_id, &user_id);
    info!(session_id = %session_id, user_id = %user_id, "rtm session closed");
}

/// Apply one parsed client frame.
fn handle_frame(
    ops: &Arc<Orchestrator>,
    handle: &SessionHandle,
    frame: ClientFrame,
    missed_pings: &mut u32,
) {
    match frame {
        ClientFrame::Hello { subscriptions, cursors } => {
            ops.attach_session(handle.clone(), &subscriptions, &cursors);
        }
        ClientFrame::Ack { cursors } => {
            ops.apply_cursor_map(&handle.user_id, &cursors);
        }
        ClientFrame::Pong { .. } => {
            *missed_pings = 0;
        }
    }
}

fn ready_frame(session_id: &str, core: &Arc<crate::state::Core>) -> ServerFrame {
    ServerFrame::Ready {
        session_id: session_id.to_string(),
        heartbeat_ms: core.config.rtm.heartbeat_ms,
        server_time: format_ts(now_ms()),
        capabilities: core.capabilities(),
    }
}

async fn send_frame(
    sender: &mut (impl futures_util::Sink<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame)
        .map_err(|e| axum::Error::new(std::io::Error::other(e.to_string())))?;
    sender.send(Message::Text(json.into())).await
}
