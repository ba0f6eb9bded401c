//! HTTP route modules for the Pagedrop server.
//!
//! Each submodule exposes a `router()` function that returns an Axum
//! `Router` fragment. [`build_router`] merges them and applies the auth
//! middleware and the shared tower layers.

pub mod keys;
pub mod pages;
pub mod public;
pub mod sys;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::middleware as axum_mw;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::middleware::require_key;
use crate::state::AppState;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    // Authenticated routes go through the bearer-key middleware.
    let authenticated_routes = Router::new()
        .merge(pages::router())
        .merge(keys::router())
        .merge(sys::admin_router())
        .route_layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            require_key,
        ));

    // Init is public and one-shot; cap concurrent attempts.
    let init_routes =
        sys::init_router().layer(tower::limit::ConcurrencyLimitLayer::new(10));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .merge(sys::public_router())
        .merge(init_routes)
        .merge(authenticated_routes)
        .merge(public::router())
        .layer(DefaultBodyLimit::max(config.body_limit_bytes()))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
