//! HTTP surface: routing, CORS and the metrics endpoint.
//!
//! The HTTP layer is deliberately thin: every handler authorizes via the
//! bearer extractor, hands the operation to the orchestrator and maps the
//! result straight to JSON. No domain logic lives here.

use crate::ops::Orchestrator;
use axum::http::{header, Method};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

mod auth;
mod dms;
mod extract;
mod messages;
mod meta;
mod rooms;
mod rtm;
mod uploads;
mod users;

pub use extract::{AppJson, Auth};

/// Build the full application router.
pub fn router(ops: Arc<Orchestrator>) -> Router {
    let max_upload = ops.core().config.limits.max_upload_bytes;

    Router::new()
        // meta
        .route("/meta/capabilities", get(meta::capabilities))
        .route("/metrics", get(meta::metrics))
        // auth
        .route("/auth/guest", post(auth::guest))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/sessions", get(auth::sessions))
        .route("/rtm/ticket", post(auth::ticket))
        .route("/rtm", get(rtm::upgrade))
        // users and directory
        .route("/users/me", get(users::me).patch(users::update_me))
        .route("/directory/users", get(users::directory_users))
        .route("/directory/rooms", get(users::directory_rooms))
        // rooms
        .route("/rooms", get(rooms::list_mine).post(rooms::create))
        .route("/rooms/{key}", get(rooms::show).patch(rooms::update))
        .route("/rooms/{key}/join", post(rooms::join))
        .route("/rooms/{key}/leave", post(rooms::leave))
        .route("/rooms/{key}/invite", post(rooms::invite))
        .route("/rooms/{key}/kick", post(rooms::kick))
        .route("/rooms/{key}/bans", post(rooms::ban))
        .route("/rooms/{key}/mutes", post(rooms::mute))
        .route("/rooms/{key}/roles", post(rooms::set_role))
        .route("/rooms/{key}/pins", post(rooms::pin))
        .route("/rooms/{key}/pins/{message_id}", delete(rooms::unpin))
        .route("/rooms/{key}/typing", post(rooms::typing))
        // room messages
        .route(
            "/rooms/{key}/messages",
            get(messages::room_forward).post(messages::room_post),
        )
        .route("/rooms/{key}/messages/backfill", get(messages::room_backfill))
        .route("/rooms/{key}/ack", post(messages::room_ack))
        .route("/rooms/{key}/cursor", get(messages::room_cursor))
        // message addressing
        .route(
            "/messages/{id}",
            patch(messages::edit).delete(messages::remove),
        )
        .route(
            "/messages/{id}/reactions",
            post(messages::react).delete(messages::unreact),
        )
        // DMs
        .route(
            "/dms/{user_id}/messages",
            get(dms::forward).post(dms::post_message),
        )
        .route("/dms/{user_id}/messages/backfill", get(dms::backfill))
        .route("/dms/{user_id}/ack", post(dms::ack))
        .route("/dms/{user_id}/cursor", get(dms::cursor))
        .route("/dms/{user_id}/typing", post(dms::typing))
        // uploads
        .route("/uploads", post(uploads::store))
        .route("/media/{cid}", get(uploads::fetch))
        .layer(axum::extract::DefaultBodyLimit::max(max_upload.max(1024 * 1024)))
        .layer(cors_layer(&ops.core().config.rtm.origin_allow))
        .with_state(ops)
}

/// CORS: the configured allowlist, or permissive `*` when none is set.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<axum::http::HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(parsed)
    }
}

/// Serve the router until the process ends.
pub async fn serve(ops: Arc<Orchestrator>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    let app = router(ops);
    tracing::info!(addr = %listener.local_addr()?, "http listening");
    axum::serve(listener, app).await
}
