//! System routes: health, admin key bootstrap and rotation, usage stats.
//!
//! Health and init are public. Stats and rotation require the admin key.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use pagedrop_core::keys::KeyContext;
use pagedrop_core::stats::StatsSnapshot;

use crate::error::AppError;
use crate::state::AppState;

/// Public system routes.
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new().route("/api/health", get(health))
}

/// One-shot admin bootstrap.
pub fn init_router() -> Router<Arc<AppState>> {
    Router::new().route("/api/init", post(init))
}

/// Admin-only system routes. Mounted behind the auth middleware.
pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/stats", get(stats))
        .route("/api/admin/key", put(rotate_admin_key))
}

// ── Request / Response types ─────────────────────────────────────────

/// Response body for `GET /api/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Unix seconds.
    pub timestamp: i64,
    /// Whether an admin key has been set.
    pub initialized: bool,
}

/// Request body for `POST /api/init`.
#[derive(Debug, Deserialize)]
pub struct InitRequest {
    pub admin_key: String,
}

/// Response body for `POST /api/init`.
#[derive(Debug, Serialize)]
pub struct InitResponse {
    pub initialized: bool,
}

/// Request body for `PUT /api/admin/key`.
#[derive(Debug, Deserialize)]
pub struct RotateAdminRequest {
    pub old_key: String,
    pub new_key: String,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Liveness plus storage reachability.
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let timestamp = chrono::Utc::now().timestamp();
    match state.keys.is_initialized().await {
        Ok(initialized) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                timestamp,
                initialized,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "health check could not reach storage");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    timestamp,
                    initialized: false,
                }),
            )
        }
    }
}

/// Set the admin key. Fails with 409 once one exists.
async fn init(
    State(state): State<Arc<AppState>>,
    body: Result<Json<InitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InitResponse>), AppError> {
    let Json(body) = body?;
    state.keys.initialize_admin(&body.admin_key).await?;
    Ok((StatusCode::CREATED, Json(InitResponse { initialized: true })))
}

/// Usage counters (admin only).
async fn stats(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<KeyContext>,
) -> Result<Json<StatsSnapshot>, AppError> {
    if !auth.is_admin() {
        return Err(AppError::Forbidden(
            "stats require the admin permission".to_owned(),
        ));
    }
    Ok(Json(state.stats.snapshot()))
}

/// Replace the admin secret (admin only, old secret required).
async fn rotate_admin_key(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<KeyContext>,
    body: Result<Json<RotateAdminRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    if !auth.is_admin() {
        return Err(AppError::Forbidden(
            "rotating the admin key requires the admin permission".to_owned(),
        ));
    }
    let Json(body) = body?;
    state.keys.rotate_admin(&body.old_key, &body.new_key).await?;
    Ok(StatusCode::NO_CONTENT)
}
