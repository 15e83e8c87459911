// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the booking intake service.
//!
//! A booking request moves through a fixed sequence of checks and stops at
//! the first one that rejects it:
//!
//! 1. method (POST, or OPTIONS for pre-flight)
//! 2. per-address rate limit
//! 3. field validation
//! 4. reCAPTCHA verification
//! 5. notification relay
//!
//! Every outcome is a JSON body `{success, message?, errors?}`.

use crate::config::Config;
use crate::limiter::{RateLimitResult, RateLimiter};
use crate::metrics::{Metrics, Outcome};
use crate::notify::{BookingNotification, NotificationDispatcher};
use crate::transport::HttpTransport;
use crate::validator::{BookingValidator, Submission};
use crate::verification::VerificationClient;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, ConnectInfo, State},
    http::{
        header::{self, HeaderName, InvalidHeaderValue},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

pub const MSG_SENT: &str = "Booking request sent successfully";
pub const MSG_METHOD_NOT_ALLOWED: &str = "Method not allowed";
pub const MSG_RATE_LIMITED: &str = "Too many requests. Please try again later.";
pub const MSG_VERIFICATION_FAILED: &str = "reCAPTCHA verification failed. Please try again.";
pub const MSG_BODY_TOO_LARGE: &str = "Request body too large";
pub const MSG_BODY_UNREADABLE: &str = "Invalid request body";

/// Shared application state.
pub struct AppState {
    pub limiter: RateLimiter,
    pub validator: BookingValidator,
    pub verifier: VerificationClient,
    pub dispatcher: NotificationDispatcher,
    pub metrics: Metrics,
    pub config: Config,
}

impl AppState {
    /// Wire the pipeline; both providers share `transport`.
    pub fn new(
        config: Config,
        limiter: RateLimiter,
        transport: Arc<dyn HttpTransport>,
    ) -> prometheus::Result<Self> {
        let providers = &config.providers;
        let verifier = VerificationClient::new(
            transport.clone(),
            &providers.recaptcha_verify_url,
            &providers.recaptcha_secret_key,
        );
        let dispatcher = NotificationDispatcher::new(transport, providers.clone());

        Ok(Self {
            limiter,
            validator: BookingValidator::new(),
            verifier,
            dispatcher,
            metrics: Metrics::new()?,
            config,
        })
    }
}

/// Response body for the booking endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl BookingResponse {
    pub fn sent() -> Self {
        Self {
            success: true,
            message: Some(MSG_SENT.to_string()),
            errors: None,
        }
    }

    pub fn rejected(errors: Vec<String>) -> Self {
        Self {
            success: false,
            message: None,
            errors: Some(errors),
        }
    }

    fn rejected_with(error: &str) -> Self {
        Self::rejected(vec![error.to_string()])
    }
}

/// Terminal result of one booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingReply {
    pub status: StatusCode,
    /// `None` for the empty pre-flight response
    pub body: Option<BookingResponse>,
    /// Seconds until a rate-limited caller may retry
    pub retry_after: Option<u64>,
}

impl BookingReply {
    fn new(status: StatusCode, body: BookingResponse) -> Self {
        Self {
            status,
            body: Some(body),
            retry_after: None,
        }
    }
}

impl IntoResponse for BookingReply {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        };
        if let Some(secs) = self.retry_after.filter(|s| *s > 0) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "booking-intake",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus exposition endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => text.into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Resolve the caller address used as the rate limit identity.
pub fn caller_address(
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    trust_forwarded_for: bool,
) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded {
            return addr.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Booking endpoint. Accepts every method so that unsupported ones get the
/// JSON 405 body rather than an empty one.
pub async fn book(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> BookingReply {
    // Other methods never look at the body, so a failed read only matters for POST.
    let body = match body {
        Ok(body) => body,
        Err(_) if method != Method::POST => Bytes::new(),
        Err(rejection) => return body_rejected(&state, &rejection),
    };

    let caller = caller_address(
        connect_info.map(|ConnectInfo(addr)| addr),
        &headers,
        state.config.server.trust_forwarded_for,
    );
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    handle_booking(&state, &method, &caller, content_type, &body).await
}

/// JSON reply for a body that could not be buffered (oversized, aborted).
fn body_rejected(state: &AppState, rejection: &BytesRejection) -> BookingReply {
    let status = rejection.status();
    warn!(status = %status, error = %rejection.body_text(), "Booking request body rejected");
    state.metrics.record(Outcome::Invalid);

    let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
        MSG_BODY_TOO_LARGE
    } else {
        MSG_BODY_UNREADABLE
    };
    BookingReply::new(status, BookingResponse::rejected_with(message))
}

/// Run one request through the booking pipeline.
pub async fn handle_booking(
    state: &AppState,
    method: &Method,
    caller: &str,
    content_type: Option<&str>,
    body: &[u8],
) -> BookingReply {
    if *method == Method::OPTIONS {
        state.metrics.record(Outcome::Preflight);
        return BookingReply {
            status: StatusCode::OK,
            body: None,
            retry_after: None,
        };
    }

    if *method != Method::POST {
        debug!(%method, "Method not allowed");
        state.metrics.record(Outcome::MethodNotAllowed);
        return BookingReply::new(
            StatusCode::METHOD_NOT_ALLOWED,
            BookingResponse::rejected_with(MSG_METHOD_NOT_ALLOWED),
        );
    }

    if let RateLimitResult::Limited {
        reason,
        retry_after,
    } = state.limiter.check(caller).await
    {
        info!(ip = %caller, reason = %reason, "Booking request rate limited");
        state.metrics.record(Outcome::RateLimited);
        return BookingReply {
            retry_after: Some(retry_after.as_secs()),
            ..BookingReply::new(
                StatusCode::TOO_MANY_REQUESTS,
                BookingResponse::rejected_with(MSG_RATE_LIMITED),
            )
        };
    }

    let submission = Submission::from_body(content_type, body);
    let errors = state.validator.validate(&submission);
    if !errors.is_empty() {
        info!(ip = %caller, ?errors, "Booking request failed validation");
        state.metrics.record(Outcome::Invalid);
        return BookingReply::new(StatusCode::BAD_REQUEST, BookingResponse::rejected(errors));
    }

    let started = Instant::now();
    let verified = state
        .verifier
        .verify(&submission.recaptcha_token, caller)
        .await;
    state
        .metrics
        .observe_upstream("recaptcha", started.elapsed().as_secs_f64());
    if !verified {
        info!(ip = %caller, "reCAPTCHA verification failed");
        state.metrics.record(Outcome::VerificationFailed);
        return BookingReply::new(
            StatusCode::BAD_REQUEST,
            BookingResponse::rejected_with(MSG_VERIFICATION_FAILED),
        );
    }

    let notification = BookingNotification::from_submission(&submission);
    let started = Instant::now();
    let result = state
        .dispatcher
        .send_with_text(
            &state.config.providers.notification_email,
            &notification.subject,
            &notification.html,
            &notification.text,
            &submission.reply_to(),
        )
        .await;
    state
        .metrics
        .observe_upstream("smtp2go", started.elapsed().as_secs_f64());

    if result.success {
        info!(ip = %caller, service = %submission.service, "Booking request sent");
        state.metrics.record(Outcome::Sent);
        BookingReply::new(StatusCode::OK, BookingResponse::sent())
    } else {
        warn!(ip = %caller, error = %result.error_message(), "Booking notification failed");
        state.metrics.record(Outcome::DispatchFailed);
        BookingReply::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            BookingResponse::rejected_with(result.error_message()),
        )
    }
}

/// Headers attached to every response the service sends.
pub fn security_headers() -> Vec<(HeaderName, HeaderValue)> {
    vec![
        (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
        (
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ),
        (
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ),
        (
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
        ),
        (
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ),
    ]
}

/// CORS and content headers for the booking endpoint.
pub fn booking_headers(
    allowed_origin: &str,
) -> Result<Vec<(HeaderName, HeaderValue)>, InvalidHeaderValue> {
    Ok(vec![
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_str(allowed_origin)?,
        ),
        (
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST, OPTIONS"),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ),
    ])
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Result<Router, InvalidHeaderValue> {
    let server = &state.config.server;

    let mut booking = Router::new().route(&server.booking_path, any(book));
    for (name, value) in booking_headers(&server.allowed_origin)? {
        booking = booking.layer(SetResponseHeaderLayer::overriding(name, value));
    }

    let mut app = booking
        .route("/health", get(health))
        .route("/healthz", get(health));
    if state.config.metrics.enabled {
        app = app.route(&state.config.metrics.path, get(metrics));
    }
    for (name, value) in security_headers() {
        app = app.layer(SetResponseHeaderLayer::overriding(name, value));
    }

    Ok(app
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state))
}
