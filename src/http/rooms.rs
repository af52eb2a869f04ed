//! Room lifecycle, membership and moderation endpoints.

use crate::error::CoreResult;
use crate::http::{AppJson, Auth};
use crate::ops::Orchestrator;
use crate::rtm::frames::TypingState;
use crate::state::types::{Role, Visibility};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateRoomBody {
    pub name: String,
    #[serde(default)]
    pub topic: String,
    pub visibility: Option<Visibility>,
}

/// POST /rooms -> 201 {room}
pub async fn create(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    AppJson(body): AppJson<CreateRoomBody>,
) -> CoreResult<(StatusCode, Json<Value>)> {
    let room = ops.create_room(
        &auth.user.user_id,
        &body.name,
        body.visibility.unwrap_or(Visibility::Public),
        &body.topic,
    )?;
    Ok((StatusCode::CREATED, Json(json!({ "room": room }))))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub mine: bool,
}

/// GET /rooms?mine=true -> {rooms}
pub async fn list_mine(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Query(_query): Query<ListQuery>,
) -> Json<Value> {
    let rooms = ops.my_rooms(&auth.user.user_id);
    Json(json!({ "rooms": rooms }))
}

/// GET /rooms/{key} -> {room}
pub async fn show(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
) -> CoreResult<Json<Value>> {
    let room = ops.get_room(&auth.user.user_id, &key)?;
    Ok(Json(json!({ "room": room })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoomBody {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub visibility: Option<Visibility>,
}

/// PATCH /rooms/{key} -> {room}
pub async fn update(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    AppJson(body): AppJson<UpdateRoomBody>,
) -> CoreResult<Json<Value>> {
    let room = ops.update_room(
        &auth.user.user_id,
        &key,
        body.name,
        body.topic,
        body.visibility,
    )?;
    Ok(Json(json!({ "room": room })))
}

/// POST /rooms/{key}/join -> 204
pub async fn join(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
) -> CoreResult<StatusCode> {
    ops.join_room(&auth.user.user_id, &key)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /rooms/{key}/leave -> 204
pub async fn leave(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
) -> CoreResult<StatusCode> {
    ops.leave_room(&auth.user.user_id, &key)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct TargetUserBody {
    pub user_id: String,
}

/// POST /rooms/{key}/invite {user_id} -> 204
pub async fn invite(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    AppJson(body): AppJson<TargetUserBody>,
) -> CoreResult<StatusCode> {
    ops.invite(&auth.user.user_id, &key, &body.user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /rooms/{key}/kick {user_id} -> 204
pub async fn kick(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    AppJson(body): AppJson<TargetUserBody>,
) -> CoreResult<StatusCode> {
    ops.kick(&auth.user.user_id, &key, &body.user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /rooms/{key}/bans {user_id} -> 204
pub async fn ban(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    AppJson(body): AppJson<TargetUserBody>,
) -> CoreResult<StatusCode> {
    ops.ban(&auth.user.user_id, &key, &body.user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct MuteBody {
    pub user_id: String,
    #[serde(default = "default_muted")]
    pub muted: bool,
}

fn default_muted() -> bool {
    true
}

/// POST /rooms/{key}/mutes {user_id, muted?} -> 204
pub async fn mute(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    AppJson(body): AppJson<MuteBody>,
) -> CoreResult<StatusCode> {
    ops.set_muted(&auth.user.user_id, &key, &body.user_id, body.muted)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SetRoleBody {
    pub user_id: String,
    pub role: Role,
}

/// POST /rooms/{key}/roles {user_id, role} -> 204
pub async fn set_role(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    AppJson(body): AppJson<SetRoleBody>,
) -> CoreResult<StatusCode> {
    ops.set_role(&auth.user.user_id, &key, &body.user_id, body.role)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PinBody {
    pub message_id: String,
}

/// POST /rooms/{key}/pins {message_id} -> 204
pub async fn pin(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    AppJson(body): AppJson<PinBody>,
) -> CoreResult<StatusCode> {
    ops.pin_message(&auth.user.user_id, &key, &body.message_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /rooms/{key}/pins/{message_id} -> 204
pub async fn unpin(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path((key, message_id)): Path<(String, String)>,
) -> CoreResult<StatusCode> {
    ops.unpin_message(&auth.user.user_id, &key, &message_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct TypingBody {
    pub state: TypingState,
}

/// POST /rooms/{key}/typing {state} -> 204
pub async fn typing(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    AppJson(body): AppJson<TypingBody>,
) -> CoreResult<StatusCode> {
    ops.room_typing(&auth.user.user_id, &key, body.state)?;
    Ok(StatusCode::NO_CONTENT)
}
