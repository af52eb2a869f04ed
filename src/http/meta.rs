//! Capability discovery and metrics endpoints.

use crate::ops::Orchestrator;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /meta/capabilities - feature set and limits.
pub async fn capabilities(State(ops): State<Arc<Orchestrator>>) -> Json<Value> {
    let core = ops.core();
    let limits = &core.config.limits;
    Json(json!({
        "capabilities": core.capabilities(),
        "limits": {
            "max_message_bytes": limits.max_message_bytes,
            "max_upload_bytes": limits.max_upload_bytes,
            "max_attachments": limits.max_attachments,
            "max_reactions_per_message": limits.max_reactions_per_message,
        },
        "heartbeat_ms": core.config.rtm.heartbeat_ms,
    }))
}

/// GET /metrics - Prometheus metrics in text format.
pub async fn metrics() -> String {
    crate::metrics::gather_metrics()
}
