//! Content-addressed blob storage endpoints.

use crate::error::{CoreError, CoreResult};
use crate::http::Auth;
use crate::ops::Orchestrator;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// POST /uploads - store a raw body, deduplicated by SHA-256. -> 201
pub async fn store(
    State(ops): State<Arc<Orchestrator>>,
    _auth: Auth,
    headers: HeaderMap,
    body: Bytes,
) -> CoreResult<(StatusCode, Json<Value>)> {
    let limits = &ops.core().config.limits;
    if body.is_empty() {
        return Err(CoreError::bad_request("empty upload"));
    }
    if body.len() > limits.max_upload_bytes {
        return Err(CoreError::PayloadTooLarge);
    }
    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let meta = ops.core().entities.put_blob(body.to_vec(), &mime);
    tracing::debug!(cid = %meta.cid, bytes = meta.bytes, "blob stored");
    Ok((StatusCode::CREATED, Json(json!(meta))))
}

/// GET /media/{cid} - fetch a blob. HEAD is answered from the same route.
pub async fn fetch(
    State(ops): State<Arc<Orchestrator>>,
    Path(cid): Path<String>,
) -> CoreResult<Response> {
    let blob = ops
        .core()
        .entities
        .get_blob(&cid)
        .ok_or(CoreError::NotFound("media"))?;
    let response = (
        [
            (header::CONTENT_TYPE, blob.mime.clone()),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        blob.bytes.as_ref().clone(),
    )
        .into_response();
    Ok(response)
}
