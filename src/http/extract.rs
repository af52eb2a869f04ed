//! Request extractors: bearer auth and JSON bodies with taxonomy errors.

use crate::error::CoreError;
use crate::ops::Orchestrator;
use crate::state::types::User;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Authenticated caller, extracted from `Authorization: Bearer <token>`.
pub struct Auth {
    pub user: User,
    pub token: String,
}

impl FromRequestParts<Arc<Orchestrator>> for Auth {
    type Rejection = CoreError;

    async fn from_request_parts(
        parts: &mut Parts,
        ops: &Arc<Orchestrator>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(CoreError::Unauthorized)?;
        let user = ops.authenticate(&token)?;
        Ok(Auth { user, token })
    }
}

/// Pull the bearer token out of the request headers, if present.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// JSON body extractor whose rejection follows the error taxonomy
/// (`bad_request` with the canonical envelope) instead of axum's default.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = CoreError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(CoreError::bad_request(rejection.body_text())),
        }
    }
}
