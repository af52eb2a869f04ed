//! Profile and public directory endpoints.

use crate::error::CoreResult;
use crate::http::{AppJson, Auth};
use crate::ops::Orchestrator;
use crate::state::ProfilePatch;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /users/me
pub async fn me(auth: Auth) -> Json<Value> {
    Json(json!({ "user": auth.user }))
}

/// PATCH /users/me
pub async fn update_me(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    AppJson(patch): AppJson<ProfilePatch>,
) -> CoreResult<Json<Value>> {
    let user = ops.update_profile(&auth.user.user_id, patch)?;
    Ok(Json(json!({ "user": user })))
}

#[derive(Debug, Default, Deserialize)]
pub struct DirectoryQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

fn clamp(limit: Option<usize>) -> usize {
    limit.unwrap_or(50).clamp(1, 200)
}

/// GET /directory/users?q=
pub async fn directory_users(
    State(ops): State<Arc<Orchestrator>>,
    _auth: Auth,
    Query(query): Query<DirectoryQuery>,
) -> Json<Value> {
    let users = ops.search_users(&query.q, clamp(query.limit));
    Json(json!({ "users": users }))
}

/// GET /directory/rooms?q= - public rooms only.
pub async fn directory_rooms(
    State(ops): State<Arc<Orchestrator>>,
    _auth: Auth,
    Query(query): Query<DirectoryQuery>,
) -> Json<Value> {
    let rooms = ops.search_rooms(&query.q, clamp(query.limit));
    Json(json!({ "rooms": rooms }))
}
