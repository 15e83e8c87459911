// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Booking Intake Service
//!
//! Receives booking form submissions on a single endpoint, rate-limits them
//! per caller address, verifies the reCAPTCHA token and relays a notification
//! email through SMTP2GO.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables (a `.env` file is
//! honoured):
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `BOOKING_PATH`: Endpoint path (default: /api/book)
//! - `ALLOWED_ORIGIN`: Single CORS origin
//! - `RATE_LIMIT_MAX` / `RATE_LIMIT_WINDOW_SECS`: default 5 per 3600s
//! - `RATE_LIMIT_DIR`: Timestamp storage directory (default: .rate_limit)
//! - `RATE_LIMIT_FAIL_OPEN`: Admit on storage failure (default: true)
//! - `RECAPTCHA_SECRET_KEY`, `SMTP2GO_API_KEY`: required secrets
//! - `SENDER_EMAIL`, `SENDER_NAME`, `NOTIFICATION_EMAIL`: mail identities

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use booking_intake::{
    config::Config, handlers::AppState, limiter::RateLimiter, router, ReqwestTransport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env();
    config.validate()?;
    info!(
        bind_addr = %config.server.bind_addr,
        booking_path = %config.server.booking_path,
        max_requests = config.rate_limit.max_requests,
        window_secs = config.rate_limit.window_secs,
        storage_dir = %config.rate_limit.storage_dir.display(),
        fail_open = config.rate_limit.fail_open,
        "Starting booking intake"
    );

    // Create application state
    let limiter = RateLimiter::file_backed(config.rate_limit.clone());
    let transport = Arc::new(ReqwestTransport::new());
    let state = Arc::new(AppState::new(config.clone(), limiter, transport)?);

    let app = router(state)?;

    // Start server
    let addr: SocketAddr = config.server.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
