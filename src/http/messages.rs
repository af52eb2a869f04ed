//! Message read/write endpoints for rooms, plus message-id addressed
//! edit, delete and reactions.

use crate::error::CoreResult;
use crate::http::{AppJson, Auth};
use crate::ops::Orchestrator;
use crate::stream::Attachment;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct ForwardQuery {
    pub from_seq: Option<u64>,
    pub limit: Option<usize>,
}

/// GET /rooms/{key}/messages?from_seq=&limit= -> {messages, next_seq}
pub async fn room_forward(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    Query(query): Query<ForwardQuery>,
) -> CoreResult<Json<Value>> {
    let (messages, next_seq) = ops.room_messages(
        &auth.user.user_id,
        &key,
        query.from_seq.unwrap_or(1),
        query.limit.unwrap_or(0),
    )?;
    Ok(Json(json!({ "messages": messages, "next_seq": next_seq })))
}

#[derive(Debug, Default, Deserialize)]
pub struct BackfillQuery {
    pub before_seq: Option<u64>,
    pub limit: Option<usize>,
}

/// GET /rooms/{key}/messages/backfill?before_seq=&limit= -> {messages, prev_seq}
pub async fn room_backfill(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    Query(query): Query<BackfillQuery>,
) -> CoreResult<Json<Value>> {
    let (messages, prev_seq) = ops.room_backfill(
        &auth.user.user_id,
        &key,
        query.before_seq,
        query.limit.unwrap_or(0),
    )?;
    Ok(Json(json!({ "messages": messages, "prev_seq": prev_seq })))
}

#[derive(Debug, Deserialize)]
pub struct PostBody {
    #[serde(default)]
    pub text: String,
    pub content_type: Option<String>,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// POST /rooms/{key}/messages -> 201 {message}
pub async fn room_post(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    AppJson(body): AppJson<PostBody>,
) -> CoreResult<(StatusCode, Json<Value>)> {
    let message = ops.post_room_message(
        &auth.user.user_id,
        &key,
        body.text,
        body.content_type.unwrap_or_else(|| "text/markdown".to_string()),
        body.parent_id,
        body.attachments,
    )?;
    Ok((StatusCode::CREATED, Json(json!({ "message": message }))))
}

#[derive(Debug, Deserialize)]
pub struct AckBody {
    pub seq: u64,
}

/// POST /rooms/{key}/ack {seq} -> 204
pub async fn room_ack(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
    AppJson(body): AppJson<AckBody>,
) -> CoreResult<StatusCode> {
    ops.room_ack(&auth.user.user_id, &key, body.seq)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /rooms/{key}/cursor -> {seq}
pub async fn room_cursor(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(key): Path<String>,
) -> CoreResult<Json<Value>> {
    let seq = ops.room_cursor(&auth.user.user_id, &key)?;
    Ok(Json(json!({ "seq": seq })))
}

#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub text: Option<String>,
    pub attachments: Option<Vec<Attachment>>,
}

/// PATCH /messages/{id} -> {message}
pub async fn edit(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(id): Path<String>,
    AppJson(body): AppJson<EditBody>,
) -> CoreResult<Json<Value>> {
    let message = ops.edit_message(&auth.user.user_id, &id, body.text, body.attachments)?;
    Ok(Json(json!({ "message": message })))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteBody {
    pub reason: Option<String>,
}

/// DELETE /messages/{id} -> 200
pub async fn remove(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(id): Path<String>,
    body: Result<AppJson<DeleteBody>, crate::error::CoreError>,
) -> CoreResult<Json<Value>> {
    let reason = body.ok().and_then(|AppJson(b)| b.reason);
    ops.delete_message(&auth.user.user_id, &id, reason)?;
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct ReactionBody {
    pub emoji: String,
}

/// POST /messages/{id}/reactions {emoji} -> 200 {message}
pub async fn react(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(id): Path<String>,
    AppJson(body): AppJson<ReactionBody>,
) -> CoreResult<Json<Value>> {
    let message = ops.react(&auth.user.user_id, &id, &body.emoji, true)?;
    Ok(Json(json!({ "message": message })))
}

/// DELETE /messages/{id}/reactions {emoji} -> 200 {message}
pub async fn unreact(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(id): Path<String>,
    AppJson(body): AppJson<ReactionBody>,
) -> CoreResult<Json<Value>> {
    let message = ops.react(&auth.user.user_id, &id, &body.emoji, false)?;
    Ok(Json(json!({ "message": message })))
}
