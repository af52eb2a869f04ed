//! WebSocket upgrade: origin validation and ticket/bearer authentication.

use crate::error::{CoreError, CoreResult};
use crate::http::extract::bearer_token;
use crate::ops::Orchestrator;
use crate::rtm::session;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct UpgradeQuery {
    pub ticket: Option<String>,
}

/// GET /rtm -> 101
///
/// Exactly one of these must authenticate, in order of preference:
/// `?ticket=`, a `ticket.<t>` / `bearer.<token>` subprotocol, or an
/// `Authorization: Bearer` header. The matched subprotocol is echoed back
/// in the accept, per RFC 6455.
pub async fn upgrade(
    State(ops): State<Arc<Orchestrator>>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> CoreResult<Response> {
    check_origin(&headers, &ops.core().config.rtm.origin_allow)?;

    let (user_id, subprotocol) = authenticate_upgrade(&ops, &query, &headers)?;

    let ws = match subprotocol {
        Some(proto) => ws.protocols([proto]),
        None => ws,
    };
    Ok(ws.on_upgrade(move |socket| session::run(socket, ops, user_id)))
}

/// Validate the `Origin` header. Requests without one (non-browser
/// clients) always pass; with an empty allowlist any origin is accepted,
/// mirroring the permissive CORS default.
fn check_origin(headers: &HeaderMap, allowlist: &[String]) -> CoreResult<()> {
    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    if allowlist.is_empty() || allowlist.iter().any(|allowed| allowed == origin) {
        Ok(())
    } else {
        tracing::warn!(%origin, "rejected ws upgrade from disallowed origin");
        Err(CoreError::forbidden("origin not allowed"))
    }
}

/// Resolve the upgrade credentials to a user id, plus the subprotocol to
/// echo if one carried the credentials.
fn authenticate_upgrade(
    ops: &Arc<Orchestrator>,
    query: &UpgradeQuery,
    headers: &HeaderMap,
) -> CoreResult<(String, Option<String>)> {
    if let Some(ticket) = &query.ticket {
        let user_id = ops
            .core()
            .identity
            .consume_ticket(ticket)
            .ok_or(CoreError::Unauthorized)?;
        return Ok((user_id, None));
    }

    for proto in subprotocols(headers) {
        if let Some(ticket) = proto.strip_prefix("ticket.") {
            let user_id = ops
                .core()
                .identity
                .consume_ticket(ticket)
                .ok_or(CoreError::Unauthorized)?;
            return Ok((user_id, Some(proto.clone())));
        }
        if let Some(token) = proto.strip_prefix("bearer.") {
            let user = ops.authenticate(token)?;
            return Ok((user.user_id, Some(proto.clone())));
        }
    }

    if let Some(token) = bearer_token(headers) {
        let user = ops.authenticate(&token)?;
        return Ok((user.user_id, None));
    }

    Err(CoreError::Unauthorized)
}

fn subprotocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(|proto| proto.trim().to_string())
                .filter(|proto| !proto.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
