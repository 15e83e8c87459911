// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! reCAPTCHA token verification.
//!
//! Fails closed: anything other than an explicit `"success": true` from the
//! provider is a failed verification.

use crate::transport::HttpTransport;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Client for the reCAPTCHA `siteverify` endpoint.
pub struct VerificationClient {
    transport: Arc<dyn HttpTransport>,
    verify_url: String,
    secret: String,
}

impl VerificationClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        verify_url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            verify_url: verify_url.into(),
            secret: secret.into(),
        }
    }

    /// Verify `token` on behalf of `caller_address`. One attempt, no retry.
    pub async fn verify(&self, token: &str, caller_address: &str) -> bool {
        let fields = [
            ("secret", self.secret.as_str()),
            ("response", token),
            ("remoteip", caller_address),
        ];

        let response = match self.transport.post_form(&self.verify_url, &fields).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "reCAPTCHA verification request failed");
                return false;
            }
        };

        let body: Value = match response.json() {
            Ok(body) => body,
            Err(e) => {
                warn!(status = response.status, error = %e, "Malformed reCAPTCHA response");
                return false;
            }
        };

        let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
        if !success {
            debug!(
                status = response.status,
                error_codes = ?body.get("error-codes"),
                "reCAPTCHA verification rejected"
            );
        }
        success
    }
}
