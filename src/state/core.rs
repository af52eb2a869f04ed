//! The Core - central shared state for the chat broker.
//!
//! The Core is the dependency container instantiated once at process start
//! and passed explicitly to the orchestrator and the HTTP layer. It holds
//! no behavior of its own beyond construction and capability discovery;
//! state and operations live in the component it delegates to:
//! - [`IdentityStore`]: access tokens and single-use RTM tickets.
//! - [`EntityStore`]: users, rooms, memberships, moderation sets, uploads.
//! - [`StreamEngine`]: ordered message logs, cursors, reactions.
//! - [`Hub`]: live session indexes and event fan-out.
//!
//! # Lock order (deadlock prevention)
//!
//! 1. Stream mutex (per stream, via the engine)
//! 2. DashMap shard locks (entity/hub indexes, acquired inside operations)
//!
//! The stream mutex is held across mutate-and-publish; publication only
//! does non-blocking sends, so nothing below it can wait on a stream.

use crate::config::Config;
use crate::hub::Hub;
use crate::state::{EntityStore, IdentityStore};
use crate::stream::StreamEngine;

/// Central shared state container.
pub struct Core {
    pub config: Config,
    pub identity: IdentityStore,
    pub entities: EntityStore,
    pub streams: StreamEngine,
    pub hub: Hub,
}

impl Core {
    pub fn new(config: Config) -> Self {
        let identity = IdentityStore::new(config.rtm.ticket_ttl_ms);
        let streams = StreamEngine::new(config.limits.clone());
        Self {
            identity,
            entities: EntityStore::new(),
            streams,
            hub: Hub::new(),
            config,
        }
    }

    /// Feature set advertised in `/meta/capabilities` and `ready` frames.
    pub fn capabilities(&self) -> Vec<String> {
        [
            "rooms",
            "dms",
            "reactions",
            "pins",
            "typing",
            "presence",
            "uploads",
            "backfill",
            "read-cursors",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_builds_with_defaults() {
        let core = Core::new(Config::default());
        assert!(core.capabilities().contains(&"reactions".to_string()));
        assert_eq!(core.config.server.port, 8080);
    }
}
