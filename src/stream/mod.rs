//! Stream engine: ordered per-stream message logs and read state.

pub mod engine;
pub mod types;

pub use engine::{PostArgs, StreamEngine, StreamState};
pub use types::{Attachment, MessageView, ReactionCount, ReactionView, StreamEvent, StreamKey};
