// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test harness for driving the booking router end to end.
//!
//! Providers are served by a wiremock `MockServer`; rate limit records live
//! in a temporary directory that is removed when the harness is dropped.

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{Request, Response},
    Router,
};
use booking_intake::{config::Config, router, AppState, RateLimiter, ReqwestTransport};
use http_body_util::BodyExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::MockServer;

pub const BOOKING_PATH: &str = "/api/book";

pub struct TestApp {
    pub providers: MockServer,
    pub config: Config,
    pub state: Arc<AppState>,
    pub storage: TempDir,
    peer: SocketAddr,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Build an app whose provider URLs point at a fresh mock server.
    pub async fn with_config<F: FnOnce(&mut Config)>(customize: F) -> Self {
        let providers = MockServer::start().await;
        let storage = TempDir::new().expect("Failed to create temp directory");

        let mut config = Config::default();
        config.providers.recaptcha_secret_key = "test-secret".to_string();
        config.providers.smtp2go_api_key = "test-api-key".to_string();
        config.providers.recaptcha_verify_url =
            format!("{}/recaptcha/api/siteverify", providers.uri());
        config.providers.smtp2go_send_url = format!("{}/v3/email/send", providers.uri());
        config.rate_limit.storage_dir = storage.path().join(".rate_limit");
        customize(&mut config);

        let limiter = RateLimiter::file_backed(config.rate_limit.clone());
        let state = Arc::new(
            AppState::new(config.clone(), limiter, Arc::new(ReqwestTransport::new()))
                .expect("Failed to build state"),
        );

        Self {
            providers,
            config,
            state,
            storage,
            peer: "203.0.113.50:40000".parse().unwrap(),
        }
    }

    /// Router as seen by a client connecting from `peer`.
    pub fn app_for(&self, peer: SocketAddr) -> Router {
        router(self.state.clone())
            .expect("Failed to build router")
            .layer(MockConnectInfo(peer))
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.send_from(self.peer, request).await
    }

    pub async fn send_from(&self, peer: SocketAddr, request: Request<Body>) -> Response<Body> {
        self.app_for(peer)
            .oneshot(request)
            .await
            .expect("Router is infallible")
    }

    pub async fn post_json(&self, body: Value) -> Response<Body> {
        self.send(json_request(body)).await
    }

    pub async fn post_json_from(&self, peer: &str, body: Value) -> Response<Body> {
        let peer = peer.parse().expect("Invalid peer address");
        self.send_from(peer, json_request(body)).await
    }
}

pub fn json_request(body: Value) -> Request<Body> {
    Request::post(BOOKING_PATH)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn valid_booking() -> Value {
    serde_json::json!({
        "name": "Jo",
        "email": "jo@example.com",
        "service": "lockout",
        "recaptchaToken": "tok"
    })
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("Response body is not JSON")
}
