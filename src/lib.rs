//! orcd - Open Rooms Chat daemon.
//!
//! An in-memory JSON-over-HTTP+WebSocket chat broker for small
//! communities: rooms and DM streams with gap-free sequence numbers,
//! per-user read cursors, reactions, and realtime fan-out to subscribed
//! WebSocket sessions.

pub mod config;
pub mod error;
pub mod hub;
pub mod http;
pub mod ids;
pub mod metrics;
pub mod ops;
pub mod rtm;
pub mod state;
pub mod stream;
pub mod telemetry;
