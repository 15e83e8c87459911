// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for the booking endpoint.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Terminal state a booking request ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Preflight,
    MethodNotAllowed,
    RateLimited,
    Invalid,
    VerificationFailed,
    DispatchFailed,
    Sent,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::RateLimited => "rate_limited",
            Self::Invalid => "invalid",
            Self::VerificationFailed => "verification_failed",
            Self::DispatchFailed => "dispatch_failed",
            Self::Sent => "sent",
        }
    }
}

/// Metrics on a registry owned by this service.
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    upstream_latency: HistogramVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("booking_requests_total", "Booking requests by outcome"),
            &["outcome"],
        )?;
        let upstream_latency = HistogramVec::new(
            HistogramOpts::new(
                "booking_upstream_latency_seconds",
                "Latency of verification and relay calls",
            ),
            &["provider"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(upstream_latency.clone()))?;

        Ok(Self {
            registry,
            requests,
            upstream_latency,
        })
    }

    pub fn record(&self, outcome: Outcome) {
        self.requests.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn observe_upstream(&self, provider: &str, seconds: f64) {
        self.upstream_latency
            .with_label_values(&[provider])
            .observe(seconds);
    }

    pub fn count(&self, outcome: Outcome) -> u64 {
        self.requests.with_label_values(&[outcome.as_str()]).get()
    }

    /// Text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
