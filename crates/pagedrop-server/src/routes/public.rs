//! Public routes: the landing page and deployed pages at `/{page_id}`.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tracing::{error, warn};

use pagedrop_core::error::PageError;

use crate::state::AppState;

/// Build the public router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(landing))
        .route("/{page_id}", get(serve_page))
}

const LANDING_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Pagedrop</title>
<style>
body { font-family: system-ui, sans-serif; max-width: 46rem; margin: 3rem auto; padding: 0 1rem; color: #222; }
code { background: #f3f3f3; padding: 0.1rem 0.3rem; border-radius: 3px; }
li { margin: 0.3rem 0; }
</style>
</head>
<body>
<h1>Pagedrop</h1>
<p>Deploy an HTML document and get back a public link.</p>
<h2>API</h2>
<ul>
<li><code>POST /api/pages</code> deploy a page (bearer key with <code>create</code>)</li>
<li><code>GET /api/pages/{id}</code> page metadata (bearer key with <code>view</code>)</li>
<li><code>DELETE /api/pages/{id}</code> delete a page (owner with <code>delete</code>, or admin)</li>
<li><code>GET /api/health</code> service status</li>
<li><code>GET /api/stats</code> usage counters (admin)</li>
<li><code>POST /api/keys</code>, <code>GET /api/keys</code>, <code>DELETE /api/keys/{id}</code> access keys (admin)</li>
<li><code>GET /{id}</code> view a deployed page</li>
</ul>
</body>
</html>
"#;

const NOT_FOUND_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Page not found</title>
<style>
body { font-family: system-ui, sans-serif; display: flex; align-items: center; justify-content: center; height: 100vh; margin: 0; }
.error { text-align: center; }
h1 { font-size: 5rem; margin: 0; }
</style>
</head>
<body>
<div class="error">
<h1>404</h1>
<p>This page does not exist or has expired.</p>
</div>
</body>
</html>
"#;

async fn landing() -> Html<&'static str> {
    Html(LANDING_HTML)
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html(NOT_FOUND_HTML)).into_response()
}

/// Serve a deployed page verbatim and count the visit.
async fn serve_page(State(state): State<Arc<AppState>>, Path(page_id): Path<String>) -> Response {
    let page = match state.pages.get_page(&page_id).await {
        Ok(page) => page,
        Err(PageError::NotFound { .. }) => return not_found(),
        Err(e) => {
            error!(page_id = %page_id, error = %e, "failed to load page");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response();
        }
    };

    // A lost count never blocks the visitor.
    if let Err(e) = state.pages.record_access(&page).await {
        warn!(page_id = %page_id, error = %e, "failed to record page access");
    }

    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        page.html_content,
    )
        .into_response()
}
