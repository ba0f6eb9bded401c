//! Authentication middleware for Pagedrop.
//!
//! Extracts the `Authorization: Bearer <key>` header, validates it against
//! the key manager, and injects the resulting [`KeyContext`] into the
//! request extensions for downstream handlers to use for permission checks.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use pagedrop_core::keys::KeyContext;

use crate::error::AppError;
use crate::state::AppState;

/// Pull the bearer secret out of an `Authorization` header value.
fn bearer_secret(value: &str) -> Option<&str> {
    let (scheme, secret) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let secret = secret.trim();
    (!secret.is_empty()).then_some(secret)
}

/// Middleware that validates the bearer access key.
///
/// Applied with `route_layer`, so it only runs for routes that matched.
pub async fn require_key(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let secret = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_secret)
        .map(str::to_owned);

    let Some(secret) = secret else {
        return AppError::Unauthorized("missing bearer access key".to_owned()).into_response();
    };

    match state.keys.validate(&secret).await {
        Ok(ctx) => {
            debug!(key_id = %ctx.key_id, path = %req.uri().path(), "request authenticated");
            req.extensions_mut().insert::<KeyContext>(ctx);
            next.run(req).await
        }
        Err(e) => AppError::from(e).into_response(),
    }
}
