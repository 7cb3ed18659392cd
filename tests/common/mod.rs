#![allow(dead_code)]

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use adda::app::community::MemoryCommunityStore;
use adda::app::moderation::ModerationEngine;
use adda::app::rate_limiter::RateLimiter;
use adda::{http, AppState};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const TEST_ADMIN_TOKEN: &str = "test-admin-token-12345";
pub const TEST_BYPASS_TOKEN: &str = "test-bypass-token-67890";
pub const DEFAULT_IP: &str = "203.0.113.10";

// ---------------------------------------------------------------------------
// TestApp — a fresh in-memory instance per test
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

impl TestApp {
    /// Memory store, memory-only rate limiter, heuristic-only moderation:
    /// the configuration the server itself runs when no backing services
    /// are reachable, which makes the whole HTTP surface testable here.
    pub fn new() -> Self {
        let state = AppState {
            store: Arc::new(MemoryCommunityStore::new()),
            rate_limiter: RateLimiter::new(None, None),
            moderation: ModerationEngine::heuristic_only(),
            db: None,
            cache: None,
            admin_token: Some(TEST_ADMIN_TOKEN.to_string()),
            test_bypass_token: Some(TEST_BYPASS_TOKEN.to_string()),
            submission_window: Duration::from_secs(6 * 60 * 60),
            reaction_window: Duration::from_secs(365 * 24 * 60 * 60),
        };

        Self {
            router: http::router(state),
        }
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request should not fail at the transport level");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should collect")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    fn connect_info(ip: &str) -> ConnectInfo<SocketAddr> {
        let addr = SocketAddr::from_str(&format!("{}:54321", ip))
            .expect("test ip should parse");
        ConnectInfo(addr)
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
        ip: &str,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request should build");

        let (mut parts, body) = request.into_parts();
        parts.extensions.insert(Self::connect_info(ip));
        self.send(Request::from_parts(parts, body)).await
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Method::GET, path, None, &[], DEFAULT_IP).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        self.request(Method::POST, path, Some(body), headers, DEFAULT_IP)
            .await
    }

    // ------------------------------------------------------------------
    // Community helpers
    // ------------------------------------------------------------------

    pub async fn submit(&self, device: &str, text: &str) -> TestResponse {
        self.submit_from(device, DEFAULT_IP, text).await
    }

    pub async fn submit_from(&self, device: &str, ip: &str, text: &str) -> TestResponse {
        self.request(
            Method::POST,
            "/api/submit-story",
            Some(json!({
                "name": "Test Golpo",
                "isAnonymous": false,
                "lang": "en",
                "text": text,
            })),
            &[("x-device-id", device)],
            ip,
        )
        .await
    }

    pub async fn submit_bypass(&self, device: &str, text: &str) -> TestResponse {
        self.request(
            Method::POST,
            "/api/submit-story",
            Some(json!({
                "name": "Bypass Bot",
                "isAnonymous": false,
                "lang": "en",
                "text": text,
            })),
            &[
                ("x-device-id", device),
                ("x-test-bypass", TEST_BYPASS_TOKEN),
            ],
            ip_for_device(device).as_str(),
        )
        .await
    }

    pub async fn react(&self, device: &str, post_id: &str, reaction: &str) -> TestResponse {
        self.post_json(
            "/api/reaction",
            json!({ "postId": post_id, "type": reaction }),
            &[("x-device-id", device)],
        )
        .await
    }

    pub async fn feed(&self) -> Value {
        let resp = self.get("/api/community/feed").await;
        assert_eq!(resp.status, StatusCode::OK);
        resp.json()
    }

    // ------------------------------------------------------------------
    // Admin helpers
    // ------------------------------------------------------------------

    pub async fn admin_get(&self, path: &str) -> TestResponse {
        self.request(
            Method::GET,
            path,
            None,
            &[("x-admin-token", TEST_ADMIN_TOKEN)],
            DEFAULT_IP,
        )
        .await
    }

    pub async fn admin_post(&self, path: &str, body: Option<Value>) -> TestResponse {
        self.request(
            Method::POST,
            path,
            body,
            &[("x-admin-token", TEST_ADMIN_TOKEN)],
            DEFAULT_IP,
        )
        .await
    }
}

/// Distinct ip per device so bypass helpers never trip the (ip, device)
/// submission window by accident.
fn ip_for_device(device: &str) -> String {
    let octet = (device.bytes().map(u32::from).sum::<u32>() % 200) + 1;
    format!("198.51.100.{}", octet)
}

/// Publish a post via the bypass header and return its id.
pub async fn publish_post(app: &TestApp, device: &str, text: &str) -> String {
    let resp = app.submit_bypass(device, text).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["status"].as_str().unwrap(), "published");
    body["postId"].as_str().unwrap().to_string()
}
