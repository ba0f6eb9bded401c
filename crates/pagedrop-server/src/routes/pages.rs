//! Page management routes: `/api/pages`
//!
//! Deploy, inspect, list and delete pages. Every route here sits behind the
//! bearer-key middleware; permission checks happen in the page store.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use pagedrop_core::keys::KeyContext;
use pagedrop_core::pages::{CreatePageRequest, DEFAULT_LIST_LIMIT, PageInfo};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/api/pages` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/pages", get(list_pages).post(create_page))
        .route("/api/pages/{page_id}", get(page_info).delete(delete_page))
}

// ── Request / Response types ─────────────────────────────────────────

/// Response body for `POST /api/pages`.
#[derive(Debug, Serialize)]
pub struct CreatePageResponse {
    pub page_id: String,
    pub url: String,
    pub title: String,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds, absent for permanent pages.
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PageListResponse {
    pub pages: Vec<PageInfo>,
    pub count: usize,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Deploy a page.
async fn create_page(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<KeyContext>,
    body: Result<Json<CreatePageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatePageResponse>), AppError> {
    let Json(request) = body?;
    let page = state.pages.create_page(request, &auth).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatePageResponse {
            url: state.page_url(&page.page_id),
            page_id: page.page_id,
            title: page.title,
            created_at: page.created_at.timestamp(),
            expires_at: page.expires_at.map(|t| t.timestamp()),
        }),
    ))
}

/// Live pages, newest first (admin only).
async fn list_pages(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<KeyContext>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<PageListResponse>, AppError> {
    let Query(query) = query?;
    let pages = state
        .pages
        .list_pages(&auth, query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(PageListResponse {
        count: pages.len(),
        pages,
    }))
}

/// Page metadata without the content.
async fn page_info(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<KeyContext>,
    Path(page_id): Path<String>,
) -> Result<Json<PageInfo>, AppError> {
    Ok(Json(state.pages.page_info(&page_id, &auth).await?))
}

/// Delete a page (owner with `delete`, or admin).
async fn delete_page(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<KeyContext>,
    Path(page_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.pages.delete_page(&page_id, &auth).await?;
    Ok(StatusCode::NO_CONTENT)
}
