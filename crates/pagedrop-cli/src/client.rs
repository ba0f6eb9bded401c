//! Thin HTTP client for the Pagedrop API.
//!
//! Every call returns the decoded JSON body, or a [`ClientError`] that keeps
//! server rejections apart from transport failures.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;

/// Deploy and other write calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Health check.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("{action} failed (HTTP {status}): {detail}")]
    Api {
        action: &'static str,
        status: u16,
        detail: String,
    },

    /// No usable response: connection refused, DNS, timeout, TLS.
    #[error("network request failed: {0}")]
    Network(String),

    /// A success status with a body that is not JSON.
    #[error("unexpected response from server: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim().trim_end_matches('/').to_owned(),
        }
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .timeout(REQUEST_TIMEOUT);
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn health(&self) -> Result<Value, ClientError> {
        let req = self
            .request(Method::GET, "/api/health", None)
            .timeout(HEALTH_TIMEOUT);
        send(req, "health check").await
    }

    pub async fn deploy(&self, token: &str, body: &Value) -> Result<Value, ClientError> {
        send(
            self.request(Method::POST, "/api/pages", Some(token)).json(body),
            "deployment",
        )
        .await
    }

    pub async fn init(&self, admin_key: &str) -> Result<Value, ClientError> {
        let body = serde_json::json!({ "admin_key": admin_key });
        send(
            self.request(Method::POST, "/api/init", None).json(&body),
            "initialization",
        )
        .await
    }

    pub async fn rotate_admin(
        &self,
        old_key: &str,
        new_key: &str,
    ) -> Result<Value, ClientError> {
        let body = serde_json::json!({ "old_key": old_key, "new_key": new_key });
        send(
            self.request(Method::PUT, "/api/admin/key", Some(old_key))
                .json(&body),
            "admin key rotation",
        )
        .await
    }

    pub async fn get(
        &self,
        token: &str,
        path: &str,
        action: &'static str,
    ) -> Result<Value, ClientError> {
        send(self.request(Method::GET, path, Some(token)), action).await
    }

    pub async fn post(
        &self,
        token: &str,
        path: &str,
        body: &Value,
        action: &'static str,
    ) -> Result<Value, ClientError> {
        send(self.request(Method::POST, path, Some(token)).json(body), action).await
    }

    pub async fn delete(
        &self,
        token: &str,
        path: &str,
        action: &'static str,
    ) -> Result<Value, ClientError> {
        send(self.request(Method::DELETE, path, Some(token)), action).await
    }
}

async fn send(req: RequestBuilder, action: &'static str) -> Result<Value, ClientError> {
    let resp = req.send().await?;
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(ClientError::Api {
            action,
            status: status.as_u16(),
            detail: error_detail(&body, status),
        });
    }
    if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Prefer the server's `message` field, fall back to the raw body.
fn error_detail(body: &str, status: StatusCode) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    if let Some(message) = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
    {
        return message.to_owned();
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_owned()
    } else {
        trimmed.to_owned()
    }
}
