//! End-to-end HTTP tests against the full router over in-memory storage.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Duration;
use serde_json::{Value, json};
use tower::ServiceExt;

use pagedrop_core::clock::{Clock, ManualClock};
use pagedrop_server::config::ServerConfig;
use pagedrop_server::routes::build_router;
use pagedrop_server::state::build_app_state;
use pagedrop_storage::MemoryBackend;

const ADMIN: &str = "test-admin-secret";

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
}

async fn app_with(config: ServerConfig) -> TestApp {
    let clock = Arc::new(ManualClock::starting_at_secs(1_700_000_000));
    let state = build_app_state(
        &config,
        Arc::new(MemoryBackend::new()),
        Arc::clone(&clock) as Arc<dyn Clock>,
    )
    .await
    .unwrap();
    TestApp {
        router: build_router(state, &config),
        clock,
    }
}

async fn app() -> TestApp {
    app_with(ServerConfig {
        admin_key: Some(ADMIN.to_owned()),
        public_url: "https://pages.example.com".to_owned(),
        ..ServerConfig::default()
    })
    .await
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, bytes.to_vec())
}

async fn send_json(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, _, bytes) = send(router, method, uri, token, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn page_body(html: &str, expires_in_days: u32) -> Value {
    json!({
        "title": "Quarterly report",
        "description": "Numbers for Q3",
        "html_content": html,
        "expires_in_days": expires_in_days,
    })
}

async fn deploy(router: &Router, token: &str, expires_in_days: u32) -> String {
    let (status, body) = send_json(
        router,
        "POST",
        "/api/pages",
        Some(token),
        Some(page_body("<h1>Hello</h1>", expires_in_days)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["page_id"].as_str().unwrap().to_owned()
}

async fn issue_key(router: &Router, params: Value) -> (String, String) {
    let (status, body) = send_json(router, "POST", "/api/keys", Some(ADMIN), Some(params)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (
        body["api_key"].as_str().unwrap().to_owned(),
        body["key_id"].as_str().unwrap().to_owned(),
    )
}

// ── System ───────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_initialization() {
    let fresh = app_with(ServerConfig::default()).await;
    let (status, body) = send_json(&fresh.router, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["initialized"], false);
    assert!(body["timestamp"].as_i64().unwrap() > 0);

    let configured = app().await;
    let (_, body) = send_json(&configured.router, "GET", "/api/health", None, None).await;
    assert_eq!(body["initialized"], true);
}

#[tokio::test]
async fn init_is_one_shot() {
    let app = app_with(ServerConfig::default()).await;

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/api/init",
        None,
        Some(json!({ "admin_key": "fresh-admin-key" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["initialized"], true);

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/api/init",
        None,
        Some(json!({ "admin_key": "another-admin-key" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _) = send_json(&app.router, "GET", "/api/stats", Some("fresh-admin-key"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn init_rejects_short_secret() {
    let app = app_with(ServerConfig::default()).await;
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/api/init",
        None,
        Some(json!({ "admin_key": "short" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn responses_carry_security_and_cors_headers() {
    let app = app().await;
    let request = Request::builder()
        .uri("/api/health")
        .header(header::ORIGIN, "https://somewhere.example")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    let headers = response.headers();
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

// ── Deployment ───────────────────────────────────────────────────────

#[tokio::test]
async fn deploy_returns_public_url() {
    let app = app().await;
    let (status, body) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        Some(ADMIN),
        Some(page_body("<h1>Hello</h1>", 7)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let page_id = body["page_id"].as_str().unwrap();
    assert_eq!(page_id.len(), 16);
    assert_eq!(
        body["url"],
        format!("https://pages.example.com/{page_id}")
    );
    assert_eq!(body["title"], "Quarterly report");
    let created = body["created_at"].as_i64().unwrap();
    assert_eq!(created, 1_700_000_000);
    assert_eq!(body["expires_at"].as_i64().unwrap(), created + 7 * 86_400);
}

#[tokio::test]
async fn permanent_page_has_no_expiry() {
    let app = app().await;
    let (_, body) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        Some(ADMIN),
        Some(page_body("<p>forever</p>", 0)),
    )
    .await;
    assert!(body["expires_at"].is_null());
}

#[tokio::test]
async fn deploy_requires_a_key() {
    let app = app().await;
    let (status, body) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        None,
        Some(page_body("<p>x</p>", 0)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        Some("pd_not_a_real_key"),
        Some(page_body("<p>x</p>", 0)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn deploy_validates_fields() {
    let app = app().await;

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        Some(ADMIN),
        Some(json!({ "title": "", "description": "d", "html_content": "<p>x</p>" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("title"));

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        Some(ADMIN),
        Some(page_body("<p>x</p>", 366)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app.router, "POST", "/api/pages", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_html_is_rejected() {
    let app = app_with(ServerConfig {
        admin_key: Some(ADMIN.to_owned()),
        max_html_kb: 10,
        ..ServerConfig::default()
    })
    .await;

    // Over the HTML ceiling but inside the body limit.
    let html = "a".repeat(10 * 1024 + 1);
    let (status, body) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        Some(ADMIN),
        Some(page_body(&html, 0)),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "payload_too_large");

    // Over the body limit itself.
    let html = "a".repeat(200 * 1024);
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        Some(ADMIN),
        Some(page_body(&html, 0)),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let (_, stats) = send_json(&app.router, "GET", "/api/stats", Some(ADMIN), None).await;
    assert_eq!(stats["pages_created"], 0);
}

#[tokio::test]
async fn ascii_escaped_html_at_the_ceiling_is_accepted() {
    let app = app_with(ServerConfig {
        admin_key: Some(ADMIN.to_owned()),
        max_html_kb: 100,
        ..ServerConfig::default()
    })
    .await;

    // Each escaped surrogate pair is 12 body bytes for 4 bytes of HTML.
    let emoji = 100 * 1024 / 4;
    let body = format!(
        r#"{{"title":"Emoji wall","description":"All of them","html_content":"{}"}}"#,
        r"\ud83d\ude00".repeat(emoji)
    );
    assert!(body.len() > 3 * 100 * 1024);

    let request = Request::builder()
        .method("POST")
        .uri("/api/pages")
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let created: Value = serde_json::from_slice(&bytes).unwrap();
    let page_id = created["page_id"].as_str().unwrap();

    let (status, _, served) = send(&app.router, "GET", &format!("/{page_id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served.len(), 100 * 1024);
    assert_eq!(served, "\u{1F600}".repeat(emoji).into_bytes());
}

#[tokio::test]
async fn quota_frees_up_after_delete() {
    let app = app().await;
    let (secret, _) = issue_key(
        &app.router,
        json!({
            "key_name": "limited",
            "permissions": ["create", "view", "delete"],
            "max_pages": 2,
        }),
    )
    .await;

    let first = deploy(&app.router, &secret, 0).await;
    deploy(&app.router, &secret, 0).await;

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        Some(&secret),
        Some(page_body("<p>third</p>", 0)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["message"].as_str().unwrap().contains('2'));

    let (status, _) = send_json(
        &app.router,
        "DELETE",
        &format!("/api/pages/{first}"),
        Some(&secret),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    deploy(&app.router, &secret, 0).await;
}

#[tokio::test]
async fn key_without_create_cannot_deploy() {
    let app = app().await;
    let (secret, _) = issue_key(
        &app.router,
        json!({ "key_name": "viewer", "permissions": ["view"] }),
    )
    .await;
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        Some(&secret),
        Some(page_body("<p>x</p>", 0)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ── Serving ──────────────────────────────────────────────────────────

#[tokio::test]
async fn served_page_is_verbatim_and_counted() {
    let app = app().await;
    let page_id = deploy(&app.router, ADMIN, 0).await;

    for _ in 0..3 {
        let (status, headers, body) =
            send(&app.router, "GET", &format!("/{page_id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(body, b"<h1>Hello</h1>");
    }

    let (status, info) = send_json(
        &app.router,
        "GET",
        &format!("/api/pages/{page_id}"),
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["access_count"], 3);
    assert!(info.get("html_content").is_none());

    let (_, stats) = send_json(&app.router, "GET", "/api/stats", Some(ADMIN), None).await;
    assert_eq!(stats["total_access"], 3);
}

#[tokio::test]
async fn missing_page_is_html_404() {
    let app = app().await;
    for path in ["/0123456789abcdef", "/not-a-page-id"] {
        let (status, headers, body) = send(&app.router, "GET", path, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(
            headers[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
        assert!(String::from_utf8(body).unwrap().contains("404"));
    }
}

#[tokio::test]
async fn expired_page_disappears() {
    let app = app().await;
    let page_id = deploy(&app.router, ADMIN, 1).await;

    let (status, _, _) = send(&app.router, "GET", &format!("/{page_id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);

    app.clock.advance(Duration::days(1));

    let (status, _, _) = send(&app.router, "GET", &format!("/{page_id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(
        &app.router,
        "GET",
        &format!("/api/pages/{page_id}"),
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn landing_page_is_served() {
    let app = app().await;
    let (status, _, body) = send(&app.router, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("Pagedrop"));
}

// ── Page management ──────────────────────────────────────────────────

#[tokio::test]
async fn only_owner_or_admin_deletes() {
    let app = app().await;
    let (owner, _) = issue_key(
        &app.router,
        json!({ "key_name": "owner", "permissions": ["create", "view", "delete"] }),
    )
    .await;
    let (other, _) = issue_key(
        &app.router,
        json!({ "key_name": "other", "permissions": ["create", "view", "delete"] }),
    )
    .await;

    let page_id = deploy(&app.router, &owner, 0).await;
    let path = format!("/api/pages/{page_id}");

    let (status, _) = send_json(&app.router, "DELETE", &path, Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send_json(&app.router, "DELETE", &path, Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send_json(&app.router, "DELETE", &path, Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app.router, "GET", &format!("/{page_id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_lists_pages_newest_first() {
    let app = app().await;
    let older = deploy(&app.router, ADMIN, 0).await;
    app.clock.advance(Duration::seconds(10));
    let newer = deploy(&app.router, ADMIN, 0).await;

    let (status, body) = send_json(&app.router, "GET", "/api/pages", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["pages"][0]["page_id"], newer.as_str());
    assert_eq!(body["pages"][1]["page_id"], older.as_str());

    let (_, body) = send_json(&app.router, "GET", "/api/pages?limit=1", Some(ADMIN), None).await;
    assert_eq!(body["count"], 1);

    let (status, _) = send_json(&app.router, "GET", "/api/pages?limit=abc", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Keys ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn key_lifecycle() {
    let app = app().await;
    let (secret, key_id) = issue_key(
        &app.router,
        json!({ "key_name": "ci-bot", "max_pages": 5, "expires_in_days": 30 }),
    )
    .await;
    assert!(secret.starts_with("pd_"));

    let (status, body) = send_json(&app.router, "GET", "/api/keys", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["key_id"], key_id.as_str());
    assert_eq!(keys[0]["key_name"], "ci-bot");
    assert_eq!(keys[0]["permissions"], json!(["create", "view"]));
    assert!(keys[0].get("api_key").is_none());
    assert!(keys[0].get("secret_hash").is_none());

    deploy(&app.router, &secret, 0).await;

    let (status, _) = send_json(
        &app.router,
        "DELETE",
        &format!("/api/keys/{key_id}"),
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        Some(&secret),
        Some(page_body("<p>x</p>", 0)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = send_json(&app.router, "GET", "/api/keys", Some(ADMIN), None).await;
    assert!(body["keys"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn expired_key_is_rejected() {
    let app = app().await;
    let (secret, _) = issue_key(
        &app.router,
        json!({ "key_name": "short-lived", "expires_in_days": 1 }),
    )
    .await;
    deploy(&app.router, &secret, 0).await;

    app.clock.advance(Duration::days(2));

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/api/pages",
        Some(&secret),
        Some(page_body("<p>x</p>", 0)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap().contains("expired"));
}

#[tokio::test]
async fn revoked_and_expired_keys_are_refused_everywhere() {
    let app = app().await;
    let permissions = json!(["create", "view", "delete"]);
    let (revoked, revoked_id) = issue_key(
        &app.router,
        json!({ "key_name": "revoked", "permissions": permissions.clone(), "max_pages": 5 }),
    )
    .await;
    let (expiring, _) = issue_key(
        &app.router,
        json!({
            "key_name": "expiring",
            "permissions": permissions,
            "max_pages": 5,
            "expires_in_days": 1,
        }),
    )
    .await;
    let revoked_page = deploy(&app.router, &revoked, 0).await;
    let expiring_page = deploy(&app.router, &expiring, 0).await;

    let (status, _) = send_json(
        &app.router,
        "DELETE",
        &format!("/api/keys/{revoked_id}"),
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    app.clock.advance(Duration::days(2));

    for (secret, page_id) in [(&revoked, &revoked_page), (&expiring, &expiring_page)] {
        let own_page = format!("/api/pages/{page_id}");
        for (method, uri) in [
            ("GET", own_page.as_str()),
            ("DELETE", own_page.as_str()),
            ("GET", "/api/stats"),
            ("GET", "/api/keys"),
        ] {
            let (status, body) = send_json(&app.router, method, uri, Some(secret), None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}: {body}");
        }

        let (status, _) = send_json(&app.router, "GET", &own_page, Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = send(&app.router, "GET", &format!("/{page_id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn shared_keys_cannot_administer() {
    let app = app().await;
    let (secret, _) = issue_key(&app.router, json!({ "key_name": "plain" })).await;

    let (status, _) = send_json(&app.router, "GET", "/api/stats", Some(&secret), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send_json(&app.router, "GET", "/api/keys", Some(&secret), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/api/keys",
        Some(&secret),
        Some(json!({ "key_name": "escalate" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send_json(&app.router, "GET", "/api/pages", Some(&secret), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn bad_permission_name_is_rejected() {
    let app = app().await;
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/api/keys",
        Some(ADMIN),
        Some(json!({ "key_name": "typo", "permissions": ["craete"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_key_rotation() {
    let app = app().await;
    let (status, _) = send_json(
        &app.router,
        "PUT",
        "/api/admin/key",
        Some(ADMIN),
        Some(json!({ "old_key": ADMIN, "new_key": "rotated-admin-secret" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send_json(&app.router, "GET", "/api/stats", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send_json(
        &app.router,
        "GET",
        "/api/stats",
        Some("rotated-admin-secret"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn stats_track_keys_and_pages() {
    let app = app().await;
    let (_, key_id) = issue_key(&app.router, json!({ "key_name": "a" })).await;
    issue_key(&app.router, json!({ "key_name": "b" })).await;
    send_json(
        &app.router,
        "DELETE",
        &format!("/api/keys/{key_id}"),
        Some(ADMIN),
        None,
    )
    .await;
    deploy(&app.router, ADMIN, 0).await;

    let (status, stats) = send_json(&app.router, "GET", "/api/stats", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["keys_count"], 1);
    assert_eq!(stats["keys_created"], 2);
    assert_eq!(stats["pages_count"], 1);
    assert_eq!(stats["pages_created"], 1);
    assert_eq!(stats["total_access"], 0);
}
