// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Booking Intake
//!
//! A single-endpoint form intake service for booking requests:
//!
//! - Per-address sliding-window rate limiting (5 per hour default)
//! - Required field and email validation
//! - reCAPTCHA token verification (fail-closed)
//! - Notification relay through SMTP2GO with Reply-To routed to the requester

pub mod config;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod notify;
pub mod transport;
pub mod validator;
pub mod verification;

pub use config::Config;
pub use handlers::{router, AppState, BookingResponse};
pub use limiter::{FileStore, MemoryStore, RateLimitResult, RateLimitStore, RateLimiter};
pub use notify::{NotificationDispatcher, SendResult};
pub use transport::{HttpTransport, ReqwestTransport, TransportError, TransportResponse};
pub use crate::validator::{BookingValidator, Submission, ValidationError};
pub use verification::VerificationClient;
