//! Access key routes: `/api/keys`
//!
//! Issue, list and revoke shared keys. Admin only.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Extension, Json, Router};
use serde::Serialize;

use pagedrop_core::keys::{ApiKeyInfo, CreateKeyParams, IssuedKey, KeyContext};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/api/keys` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/keys", get(list_keys).post(create_key))
        .route("/api/keys/{key_id}", delete(revoke_key))
}

#[derive(Debug, Serialize)]
pub struct KeyListResponse {
    pub keys: Vec<ApiKeyInfo>,
}

/// Issue a shared key. The secret appears in this response only.
async fn create_key(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<KeyContext>,
    body: Result<Json<CreateKeyParams>, JsonRejection>,
) -> Result<(StatusCode, Json<IssuedKey>), AppError> {
    let Json(params) = body?;
    let issued = state.keys.create_key(&auth, params).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// Active shared keys, newest first.
async fn list_keys(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<KeyContext>,
) -> Result<Json<KeyListResponse>, AppError> {
    let keys = state.keys.list_keys(&auth).await?;
    Ok(Json(KeyListResponse { keys }))
}

/// Revoke a shared key. Repeating the call is harmless.
async fn revoke_key(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<KeyContext>,
    Path(key_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.keys.revoke(&auth, &key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
