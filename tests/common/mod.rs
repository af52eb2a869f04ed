//! Shared test harness: an in-process server on an ephemeral port plus
//! router-level request helpers.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use orcd::config::Config;
use orcd::ops::Orchestrator;
use orcd::state::Core;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

/// A running server bound to 127.0.0.1 on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub ops: Arc<Orchestrator>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(Config::default()).await
    }

    pub async fn spawn_with(config: Config) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let core = Arc::new(Core::new(config));
        let ops = Arc::new(Orchestrator::new(core));
        let serve_ops = Arc::clone(&ops);
        tokio::spawn(async move {
            let _ = orcd::http::serve(serve_ops, listener).await;
        });
        Self { addr, ops }
    }

    pub fn ws_url(&self, query: &str) -> String {
        format!("ws://{}/rtm{}", self.addr, query)
    }
}

/// A router-level test client; requests never touch the network.
pub struct TestClient {
    router: Router,
}

impl TestClient {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let core = Arc::new(Core::new(config));
        let ops = Arc::new(Orchestrator::new(core));
        Self { router: orcd::http::router(ops) }
    }

    pub async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Raw-body request, for uploads.
    pub async fn request_raw(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        content_type: &str,
        body: Vec<u8>,
    ) -> (StatusCode, Value, Vec<u8>) {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("Content-Type", content_type);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body)).expect("build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json, bytes.to_vec())
    }

    /// Guest login, returning (token, user_id).
    pub async fn guest(&self, name: &str) -> (String, String) {
        let (status, body) = self
            .request(
                "POST",
                "/auth/guest",
                None,
                Some(serde_json::json!({ "username": name })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "guest login failed: {body}");
        (
            body["access_token"].as_str().expect("token").to_string(),
            body["user"]["user_id"].as_str().expect("user_id").to_string(),
        )
    }
}
