// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Booking submission parsing and validation.
//!
//! - Body extraction from JSON or form-encoded payloads
//! - Required field checks (name, email, service, reCAPTCHA token)
//! - Email shape validation
//! - Control character stripping for values that end up in mail headers

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use ::validator::ValidateEmail;

/// Validation error types.
///
/// The display strings are returned to the caller verbatim.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Name is required")]
    MissingName,

    #[error("Valid email is required")]
    InvalidEmail,

    #[error("Service type is required")]
    MissingService,

    #[error("reCAPTCHA verification failed")]
    MissingToken,
}

/// A booking request as submitted by the form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub service: String,
    pub recaptcha_token: String,
}

impl Submission {
    /// Build a submission from raw field values, trimming everything but
    /// the token.
    pub fn from_fields<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let trimmed = |key: &str| get(key).map(|v| v.trim().to_string()).unwrap_or_default();
        Self {
            name: trimmed("name"),
            email: trimmed("email"),
            phone: trimmed("phone"),
            service: trimmed("service"),
            recaptcha_token: get("recaptchaToken").unwrap_or_default(),
        }
    }

    /// Extract fields from a JSON object. Anything that is not an object,
    /// and any non-string field, counts as absent.
    pub fn from_json(body: &[u8]) -> Self {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Unparsable JSON body, treating as empty");
                Value::Null
            }
        };
        Self::from_fields(|key| value.get(key).and_then(Value::as_str).map(str::to_string))
    }

    /// Extract fields from an `application/x-www-form-urlencoded` body.
    pub fn from_form(body: &[u8]) -> Self {
        let fields: HashMap<String, String> =
            serde_urlencoded::from_bytes(body).unwrap_or_else(|e| {
                debug!(error = %e, "Unparsable form body, treating as empty");
                HashMap::new()
            });
        Self::from_fields(|key| fields.get(key).cloned())
    }

    /// Pick the parser from the request's Content-Type.
    pub fn from_body(content_type: Option<&str>, body: &[u8]) -> Self {
        match content_type {
            Some(ct) if ct.to_ascii_lowercase().contains("application/json") => {
                Self::from_json(body)
            }
            _ => Self::from_form(body),
        }
    }

    /// Email with control characters removed, safe for a Reply-To header.
    pub fn reply_to(&self) -> String {
        strip_control_chars(&self.email)
    }
}

/// Remove ASCII control characters (0x00-0x1F, 0x7F).
pub fn strip_control_chars(value: &str) -> String {
    value.chars().filter(|c| !c.is_ascii_control()).collect()
}

/// Booking submission validator.
#[derive(Debug, Default, Clone, Copy)]
pub struct BookingValidator;

impl BookingValidator {
    pub fn new() -> Self {
        Self
    }

    /// Every rule the submission violates, in a stable order.
    pub fn violations(&self, submission: &Submission) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if submission.name.is_empty() {
            errors.push(ValidationError::MissingName);
        }
        if submission.email.is_empty() || !submission.email.validate_email() {
            errors.push(ValidationError::InvalidEmail);
        }
        if submission.service.is_empty() {
            errors.push(ValidationError::MissingService);
        }
        if submission.recaptcha_token.is_empty() {
            errors.push(ValidationError::MissingToken);
        }

        if !errors.is_empty() {
            debug!(?errors, "Submission failed validation");
        }
        errors
    }

    /// Human-readable messages for every violated rule; empty when valid.
    pub fn validate(&self, submission: &Submission) -> Vec<String> {
        self.violations(submission)
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_submission() -> Submission {
        Submission {
            name: "Jo".to_string(),
            email: "jo@example.com".to_string(),
            phone: String::new(),
            service: "lockout".to_string(),
            recaptcha_token: "tok".to_string(),
        }
    }

    #[test]
    fn test_valid_submission_has_no_errors() {
        assert!(BookingValidator::new().validate(&valid_submission()).is_empty());
    }

    #[test]
    fn test_all_errors_reported_together() {
        let errors = BookingValidator::new().validate(&Submission::default());
        assert_eq!(
            errors,
            vec![
                "Name is required",
                "Valid email is required",
                "Service type is required",
                "reCAPTCHA verification failed",
            ]
        );
    }

    #[test]
    fn test_missing_token_only() {
        let submission = Submission {
            recaptcha_token: String::new(),
            ..valid_submission()
        };
        assert_eq!(
            BookingValidator::new().violations(&submission),
            vec![ValidationError::MissingToken]
        );
    }

    #[test]
    fn test_malformed_email_rejected() {
        for email in ["not-an-email", "jo@", "@example.com", "jo example@example.com"] {
            let submission = Submission {
                email: email.to_string(),
                ..valid_submission()
            };
            assert_eq!(
                BookingValidator::new().violations(&submission),
                vec![ValidationError::InvalidEmail],
                "email {:?}",
                email
            );
        }
    }

    #[test]
    fn test_phone_is_optional_and_unchecked() {
        let submission = Submission {
            phone: "call me maybe".to_string(),
            ..valid_submission()
        };
        assert!(BookingValidator::new().validate(&submission).is_empty());
    }

    #[test]
    fn test_whitespace_only_fields_are_missing() {
        let submission = Submission::from_fields(|key| match key {
            "name" | "service" => Some("   ".to_string()),
            "email" => Some(" jo@example.com ".to_string()),
            "recaptchaToken" => Some("tok".to_string()),
            _ => None,
        });
        assert_eq!(submission.email, "jo@example.com");
        assert_eq!(
            BookingValidator::new().violations(&submission),
            vec![ValidationError::MissingName, ValidationError::MissingService]
        );
    }

    #[test]
    fn test_json_body_extraction() {
        let body = br#"{"name":" Jo ","email":"jo@example.com","service":"lockout","recaptchaToken":"tok","phone":42}"#;
        let submission = Submission::from_body(Some("application/json; charset=utf-8"), body);
        assert_eq!(submission.name, "Jo");
        assert_eq!(submission.phone, "");
        assert_eq!(submission.recaptcha_token, "tok");
    }

    #[test]
    fn test_invalid_json_reads_as_empty() {
        let submission = Submission::from_body(Some("application/json"), b"{not json");
        assert_eq!(submission, Submission::default());

        let submission = Submission::from_body(Some("application/json"), b"[1, 2, 3]");
        assert_eq!(submission, Submission::default());
    }

    #[test]
    fn test_form_body_extraction() {
        let body = b"name=Jo+Smith&email=jo%40example.com&service=rekey&recaptchaToken=tok&phone=555-0100";
        let submission = Submission::from_body(Some("application/x-www-form-urlencoded"), body);
        assert_eq!(submission.name, "Jo Smith");
        assert_eq!(submission.email, "jo@example.com");
        assert_eq!(submission.phone, "555-0100");

        // Missing Content-Type falls back to form parsing.
        assert_eq!(Submission::from_body(None, body), submission);
    }

    #[test]
    fn test_reply_to_strips_control_characters() {
        let submission = Submission {
            email: "jo@example.com\r\nBcc: victim@example.org".to_string(),
            ..valid_submission()
        };
        assert_eq!(submission.reply_to(), "jo@example.comBcc: victim@example.org");
        assert_eq!(strip_control_chars("a\u{7f}b\u{0}c"), "abc");
    }
}
