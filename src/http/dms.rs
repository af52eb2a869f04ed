//! Direct-message endpoints, the DM analogs of the room message surface.

use crate::error::CoreResult;
use crate::http::messages::{AckBody, BackfillQuery, ForwardQuery, PostBody};
use crate::http::rooms::TypingBody;
use crate::http::{AppJson, Auth};
use crate::ops::Orchestrator;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /dms/{user_id}/messages -> {messages, next_seq}
pub async fn forward(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(peer_id): Path<String>,
    Query(query): Query<ForwardQuery>,
) -> CoreResult<Json<Value>> {
    let (messages, next_seq) = ops.dm_messages(
        &auth.user.user_id,
        &peer_id,
        query.from_seq.unwrap_or(1),
        query.limit.unwrap_or(0),
    )?;
    Ok(Json(json!({ "messages": messages, "next_seq": next_seq })))
}

/// GET /dms/{user_id}/messages/backfill -> {messages, prev_seq}
pub async fn backfill(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(peer_id): Path<String>,
    Query(query): Query<BackfillQuery>,
) -> CoreResult<Json<Value>> {
    let (messages, prev_seq) = ops.dm_backfill(
        &auth.user.user_id,
        &peer_id,
        query.before_seq,
        query.limit.unwrap_or(0),
    )?;
    Ok(Json(json!({ "messages": messages, "prev_seq": prev_seq })))
}

/// POST /dms/{user_id}/messages -> 201 {message}
pub async fn post_message(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(peer_id): Path<String>,
    AppJson(body): AppJson<PostBody>,
) -> CoreResult<(StatusCode, Json<Value>)> {
    let message = ops.post_dm_message(
        &auth.user.user_id,
        &peer_id,
        body.text,
        body.content_type.unwrap_or_else(|| "text/markdown".to_string()),
        body.parent_id,
        body.attachments,
    )?;
    Ok((StatusCode::CREATED, Json(json!({ "message": message }))))
}

/// POST /dms/{user_id}/ack {seq} -> 204
pub async fn ack(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(peer_id): Path<String>,
    AppJson(body): AppJson<AckBody>,
) -> CoreResult<StatusCode> {
    ops.dm_ack(&auth.user.user_id, &peer_id, body.seq)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /dms/{user_id}/cursor -> {seq}
pub async fn cursor(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(peer_id): Path<String>,
) -> CoreResult<Json<Value>> {
    let seq = ops.dm_cursor(&auth.user.user_id, &peer_id)?;
    Ok(Json(json!({ "seq": seq })))
}

/// POST /dms/{user_id}/typing {state} -> 204
pub async fn typing(
    State(ops): State<Arc<Orchestrator>>,
    auth: Auth,
    Path(peer_id): Path<String>,
    AppJson(body): AppJson<TypingBody>,
) -> CoreResult<StatusCode> {
    ops.dm_typing(&auth.user.user_id, &peer_id, body.state)?;
    Ok(StatusCode::NO_CONTENT)
}
