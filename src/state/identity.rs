//! Identity and token store.
//!
//! Issues opaque access tokens and short-lived single-use RTM tickets, and
//! resolves tokens back to users. Everything lives in DashMaps; ticket
//! consumption relies on `get_mut` holding the shard lock, so a ticket can
//! be consumed at most once even under concurrent upgrades.

use crate::ids;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// A single-use WebSocket upgrade credential.
#[derive(Debug, Clone)]
struct Ticket {
    user_id: String,
    expires_at_ms: i64,
    used: bool,
}

/// Token and ticket state.
pub struct IdentityStore {
    /// access token -> user_id
    tokens: DashMap<String, String>,
    /// user_id -> set of live tokens (for `list_sessions` / revocation)
    tokens_by_user: DashMap<String, HashSet<String>>,
    /// ticket -> pending upgrade
    tickets: DashMap<String, Ticket>,
    /// Ticket lifetime.
    ticket_ttl_ms: i64,
}

impl IdentityStore {
    pub fn new(ticket_ttl_ms: u64) -> Self {
        Self {
            tokens: DashMap::new(),
            tokens_by_user: DashMap::new(),
            tickets: DashMap::new(),
            ticket_ttl_ms: ticket_ttl_ms as i64,
        }
    }

    /// Associate a fresh opaque access token with `user_id`.
    pub fn issue_token(&self, user_id: &str) -> String {
        let token = ids::token();
        self.tokens.insert(token.clone(), user_id.to_string());
        self.tokens_by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(token.clone());
        token
    }

    /// Resolve an access token to its user id.
    pub fn resolve(&self, token: &str) -> Option<String> {
        self.tokens.get(token).map(|entry| entry.value().clone())
    }

    /// Revoke a single access token. Idempotent.
    pub fn revoke(&self, token: &str) {
        if let Some((_, user_id)) = self.tokens.remove(token) {
            if let Some(mut set) = self.tokens_by_user.get_mut(&user_id) {
                set.remove(token);
            }
        }
    }

    /// Number of live tokens for a user.
    pub fn session_count(&self, user_id: &str) -> usize {
        self.tokens_by_user
            .get(user_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Mint a single-use RTM ticket for `user_id`.
    ///
    /// Returns the ticket and its TTL in milliseconds.
    pub fn mint_ticket(&self, user_id: &str) -> (String, u64) {
        let ticket = ids::token();
        self.tickets.insert(
            ticket.clone(),
            Ticket {
                user_id: user_id.to_string(),
                expires_at_ms: super::types::now_ms() + self.ticket_ttl_ms,
                used: false,
            },
        );
        (ticket, self.ticket_ttl_ms as u64)
    }

    /// Consume a ticket, returning the user id iff the ticket exists, is
    /// unused and unexpired. Marks it used atomically; a second call with
    /// the same ticket returns `None`.
    pub fn consume_ticket(&self, ticket: &str) -> Option<String> {
        let mut entry = self.tickets.get_mut(ticket)?;
        if entry.used || super::types::now_ms() >= entry.expires_at_ms {
            return None;
        }
        entry.used = true;
        crate::metrics::TICKETS_CONSUMED.inc();
        Some(entry.user_id.clone())
    }

    /// Drop used and expired tickets.
    pub fn sweep_tickets(&self) -> usize {
        let now = super::types::now_ms();
        let before = self.tickets.len();
        self.tickets.retain(|_, t| !t.used && now < t.expires_at_ms);
        before - self.tickets.len()
    }
}

/// Periodically evict dead tickets so the map stays bounded.
pub fn spawn_ticket_sweeper(core: Arc<crate::state::Core>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = core.identity.sweep_tickets();
            if evicted > 0 {
                tracing::debug!(evicted, "swept dead tickets");
            }
        }
    });
}
