// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Booking notifications relayed through SMTP2GO.
//!
//! A send is a single POST to the relay with a bounded timeout. It only
//! counts as delivered when the relay answers 2xx *and* reports at least one
//! accepted recipient.

use crate::config::ProviderConfig;
use crate::transport::HttpTransport;
use crate::validator::{strip_control_chars, Submission};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

const FALLBACK_ERROR: &str = "Failed to send email";

/// Outcome of one relay attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendResult {
    fn sent(message_id: String) -> Self {
        Self {
            success: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }

    /// Error message for the caller; generic when the relay gave none.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or(FALLBACK_ERROR)
    }
}

/// Subject plus HTML and plain-text bodies for a booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingNotification {
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl BookingNotification {
    pub fn from_submission(submission: &Submission) -> Self {
        let subject = strip_control_chars(&format!(
            "New Booking Request: {} - {}",
            submission.service, submission.name
        ));

        let html = format!(
            "\n    <h2>New Booking Request</h2>\
             \n    <p><strong>Name:</strong> {}</p>\
             \n    <p><strong>Email:</strong> {}</p>\
             \n    <p><strong>Phone:</strong> {}</p>\
             \n    <p><strong>Service:</strong> {}</p>\
             \n    <p><strong>Location Info:</strong> Obtained via website form</p>\n",
            ammonia::clean_text(&submission.name),
            ammonia::clean_text(&submission.email),
            ammonia::clean_text(&submission.phone),
            ammonia::clean_text(&submission.service),
        );

        // Same layout as `html_to_text(html)` but with the literal values.
        let text = format!(
            "\n    New Booking Request\
             \n    Name: {}\
             \n    Email: {}\
             \n    Phone: {}\
             \n    Service: {}\
             \n    Location Info: Obtained via website form\n",
            submission.name, submission.email, submission.phone, submission.service,
        );

        Self {
            subject,
            html,
            text,
        }
    }
}

fn line_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<br\s*/?>").expect("static regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("static regex"))
}

/// Plain-text rendition of an HTML body: line breaks become newlines and
/// every remaining tag is dropped. Not a markup parser.
pub fn html_to_text(html: &str) -> String {
    let with_breaks = line_break_re().replace_all(html, "\n");
    tag_re().replace_all(&with_breaks, "").into_owned()
}

/// Client for the SMTP2GO `email/send` API.
pub struct NotificationDispatcher {
    transport: Arc<dyn HttpTransport>,
    config: ProviderConfig,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn HttpTransport>, config: ProviderConfig) -> Self {
        Self { transport, config }
    }

    /// Relay payload for one message.
    pub fn payload(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: &str,
        reply_to: &str,
    ) -> Value {
        let mut payload = json!({
            "api_key": self.config.smtp2go_api_key,
            "to": [to],
            "sender": self.config.sender(),
            "subject": subject,
            "html_body": html,
            "text_body": text,
        });

        if !reply_to.is_empty() {
            payload["custom_headers"] = json!([{ "header": "Reply-To", "value": reply_to }]);
        }
        payload
    }

    /// Send one message with a text body derived from `html`.
    pub async fn send(&self, to: &str, subject: &str, html: &str, reply_to: &str) -> SendResult {
        self.send_with_text(to, subject, html, &html_to_text(html), reply_to)
            .await
    }

    /// Send one message. Exactly one attempt; failures are returned, not retried.
    pub async fn send_with_text(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: &str,
        reply_to: &str,
    ) -> SendResult {
        let payload = self.payload(to, subject, html, text, reply_to);

        let response = match self
            .transport
            .post_json(
                &self.config.smtp2go_send_url,
                &payload,
                Some(self.config.relay_timeout()),
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Email relay request failed");
                return SendResult::failed(FALLBACK_ERROR);
            }
        };

        let body: Value = response.json().unwrap_or(Value::Null);
        let data = &body["data"];
        let succeeded = data["succeeded"].as_u64().unwrap_or(0);

        if response.is_success() && succeeded > 0 {
            let message_id = data["email_id"].as_str().unwrap_or_default().to_string();
            info!(message_id = %message_id, "Booking notification relayed");
            return SendResult::sent(message_id);
        }

        let error = data["error"]
            .as_str()
            .filter(|e| !e.is_empty())
            .unwrap_or(FALLBACK_ERROR);
        warn!(status = response.status, succeeded, error = %error, "Email relay rejected message");
        SendResult::failed(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportError, TransportResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct RelayStub {
        outcome: Mutex<Option<Result<TransportResponse, TransportError>>>,
        seen: Mutex<Vec<(Value, Option<Duration>)>>,
    }

    impl RelayStub {
        fn new(outcome: Result<TransportResponse, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(Some(outcome)),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn replying(status: u16, body: &str) -> Arc<Self> {
            Self::new(Ok(TransportResponse::new(status, body)))
        }
    }

    #[async_trait]
    impl HttpTransport for RelayStub {
        async fn post_form(
            &self,
            _url: &str,
            _fields: &[(&str, &str)],
        ) -> Result<TransportResponse, TransportError> {
            panic!("relay never posts forms");
        }

        async fn post_json(
            &self,
            _url: &str,
            body: &Value,
            timeout: Option<Duration>,
        ) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push((body.clone(), timeout));
            self.outcome.lock().unwrap().take().expect("one call only")
        }
    }

    fn provider_config() -> ProviderConfig {
        ProviderConfig {
            smtp2go_api_key: "api-key".to_string(),
            ..Default::default()
        }
    }

    fn dispatcher(stub: Arc<RelayStub>) -> NotificationDispatcher {
        NotificationDispatcher::new(stub, provider_config())
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<p>One<br>Two<br/>Three<br />Four</p>"),
            "One\nTwo\nThree\nFour"
        );
        assert_eq!(html_to_text("<h2>Title</h2><p><strong>A:</strong> b</p>"), "TitleA: b");
    }

    #[test]
    fn test_notification_escapes_fields() {
        let submission = Submission {
            name: "<script>alert(1)</script>".to_string(),
            email: "jo@example.com".to_string(),
            phone: "555 & co".to_string(),
            service: "lockout\r\nBcc: x@example.org".to_string(),
            recaptcha_token: "tok".to_string(),
        };
        let notification = BookingNotification::from_submission(&submission);

        assert!(!notification.html.contains("<script>"));
        assert!(notification.html.contains("&lt;script&gt;"));
        assert!(notification.html.contains("555&#32;&amp;&#32;co"));
        assert!(!notification.subject.contains('\n'));
        assert!(notification.subject.starts_with("New Booking Request: lockoutBcc"));
    }

    #[test]
    fn test_text_body_keeps_literal_values() {
        let submission = Submission {
            name: "Tom & Jerry's".to_string(),
            email: "tom@example.com".to_string(),
            phone: String::new(),
            service: "a<b".to_string(),
            recaptcha_token: "tok".to_string(),
        };
        let notification = BookingNotification::from_submission(&submission);

        assert!(notification.text.contains("Name: Tom & Jerry's\n"));
        assert!(notification.text.contains("Service: a<b\n"));
        assert!(!notification.text.contains("&amp;"));
        assert!(notification.html.contains("Tom&#32;&amp;&#32;Jerry"));
        assert!(notification.html.contains("a&lt;b"));
    }

    #[test]
    fn test_text_body_matches_html_layout() {
        let submission = Submission {
            name: "Jo".to_string(),
            email: "jo@example.com".to_string(),
            phone: "555".to_string(),
            service: "lockout".to_string(),
            recaptcha_token: "tok".to_string(),
        };
        let notification = BookingNotification::from_submission(&submission);

        assert_eq!(notification.text, html_to_text(&notification.html));
    }

    #[test]
    fn test_payload_shape() {
        let stub = RelayStub::replying(200, "{}");
        let payload = dispatcher(stub).payload(
            "to@example.com",
            "Subj",
            "<p>Hi</p>",
            "Hi",
            "jo@example.com",
        );

        assert_eq!(payload["api_key"], "api-key");
        assert_eq!(payload["to"], json!(["to@example.com"]));
        assert_eq!(payload["sender"], "Kwikey Locksmith <noreply@kwikeylocksmith.com>");
        assert_eq!(payload["subject"], "Subj");
        assert_eq!(payload["html_body"], "<p>Hi</p>");
        assert_eq!(payload["text_body"], "Hi");
        assert_eq!(
            payload["custom_headers"],
            json!([{ "header": "Reply-To", "value": "jo@example.com" }])
        );
    }

    #[test]
    fn test_payload_without_reply_to() {
        let stub = RelayStub::replying(200, "{}");
        let payload = dispatcher(stub).payload("to@example.com", "Subj", "<p>Hi</p>", "Hi", "");
        assert!(payload.get("custom_headers").is_none());
    }

    #[tokio::test]
    async fn test_send_success() {
        let stub = RelayStub::replying(200, r#"{"data": {"succeeded": 1, "failed": 0, "email_id": "abc"}}"#);
        let result = dispatcher(stub.clone())
            .send("to@example.com", "Subj", "<p>Hi</p>", "")
            .await;

        assert_eq!(result, SendResult::sent("abc".to_string()));
        let seen = stub.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0["text_body"], "Hi");
        assert_eq!(seen[0].1, Some(Duration::from_secs(15)));
    }

    #[tokio::test]
    async fn test_zero_succeeded_is_failure_with_provider_error() {
        let stub = RelayStub::replying(
            200,
            r#"{"data": {"succeeded": 0, "failed": 1, "error": "Sender not verified"}}"#,
        );
        let result = dispatcher(stub).send("to@example.com", "Subj", "<p>Hi</p>", "").await;

        assert!(!result.success);
        assert_eq!(result.error_message(), "Sender not verified");
    }

    #[tokio::test]
    async fn test_non_2xx_is_failure_even_with_succeeded() {
        let stub = RelayStub::replying(500, r#"{"data": {"succeeded": 1}}"#);
        let result = dispatcher(stub).send("to@example.com", "Subj", "<p>Hi</p>", "").await;

        assert!(!result.success);
        assert_eq!(result.error_message(), "Failed to send email");
    }

    #[tokio::test]
    async fn test_garbage_body_and_timeout_use_generic_error() {
        let stub = RelayStub::replying(200, "<html>bad gateway</html>");
        let result = dispatcher(stub).send("to@example.com", "Subj", "<p>Hi</p>", "").await;
        assert_eq!(result.error_message(), "Failed to send email");

        let stub = RelayStub::new(Err(TransportError::Timeout));
        let result = dispatcher(stub).send("to@example.com", "Subj", "<p>Hi</p>", "").await;
        assert!(!result.success);
        assert_eq!(result.error_message(), "Failed to send email");
    }
}
