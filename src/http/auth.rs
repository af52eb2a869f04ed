//! Guest auth, logout and RTM tickets.

use crate::error::CoreResult;
use crate::http::{AppJson, Auth};
use crate::ops::Orchestrator;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct GuestBody {
    pub username: Option<String>,
}

/// POST /auth/guest - issue a guest access token.
pub async fn guest(
    State(ops): State<Arc<Orchestrator>>,
    body: Result<AppJson<GuestBody>, crate::error::CoreError>,
) -> CoreResult<Json<Value>> {
    // an absent or empty body is a nameless guest
    let username = body.ok().and_then(|AppJson(b)| b.username);
    let (access_token, user) = ops.guest_login(username)?;
    Ok(Json(json!({ "access_token": access_token, "user": user })))
}

/// POST /auth/logout - revoke the presented token.
pub async fn logout(State(ops): State<Arc<Orchestrator>>, auth: Auth) -> StatusCode {
    ops.logout(&auth.token);
    StatusCode::NO_CONTENT
}

/// GET /auth/sessions - live token count for the caller.
pub async fn sessions(State(ops): State<Arc<Orchestrator>>, auth: Auth) -> Json<Value> {
    let count = ops.core().identity.session_count(&auth.user.user_id);
    Json(json!({ "sessions": count }))
}

/// POST /rtm/ticket - mint a single-use WebSocket upgrade ticket.
pub async fn ticket(State(ops): State<Arc<Orchestrator>>, auth: Auth) -> Json<Value> {
    let (ticket, expires_in_ms) = ops.mint_ticket(&auth.user.user_id);
    Json(json!({ "ticket": ticket, "expires_in_ms": expires_in_ms }))
}
