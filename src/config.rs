// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the booking intake service.
//!
//! Everything is loaded once at start-up and is read-only afterwards.
//! Provider secrets never leave this process: they are redacted from
//! `Debug` output and are never echoed back to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Configuration errors detected at start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid URL for {name}: {url}")]
    InvalidUrl { name: &'static str, url: String },

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Configuration for the booking intake service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Verification and email relay providers
    #[serde(default)]
    pub providers: ProviderConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Path of the booking endpoint (default: /api/book)
    #[serde(default = "default_booking_path")]
    pub booking_path: String,

    /// The single origin allowed by CORS
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,

    /// Take the caller address from `X-Forwarded-For` instead of the peer
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

/// Sliding-window rate limit applied per caller address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window (default: 5)
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds (default: 3600)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Directory holding one timestamp file per hashed identity
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Admit requests when storage is unusable (default: true)
    #[serde(default = "default_true")]
    pub fail_open: bool,
}

/// Outbound providers: reCAPTCHA and SMTP2GO.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub recaptcha_secret_key: String,

    #[serde(default = "default_recaptcha_verify_url")]
    pub recaptcha_verify_url: String,

    #[serde(default)]
    pub smtp2go_api_key: String,

    #[serde(default = "default_smtp2go_send_url")]
    pub smtp2go_send_url: String,

    /// Relay request timeout in seconds (default: 15)
    #[serde(default = "default_smtp2go_timeout_secs")]
    pub smtp2go_timeout_secs: u64,

    #[serde(default = "default_sender_email")]
    pub sender_email: String,

    #[serde(default = "default_sender_name")]
    pub sender_name: String,

    /// Where booking notifications are delivered
    #[serde(default = "default_notification_email")]
    pub notification_email: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_booking_path() -> String {
    "/api/book".to_string()
}

fn default_allowed_origin() -> String {
    "https://kwikeylocksmith.com".to_string()
}

fn default_max_requests() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    3600
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".rate_limit")
}

fn default_recaptcha_verify_url() -> String {
    "https://www.google.com/recaptcha/api/siteverify".to_string()
}

fn default_smtp2go_send_url() -> String {
    "https://api.smtp2go.com/v3/email/send".to_string()
}

fn default_smtp2go_timeout_secs() -> u64 {
    15
}

fn default_sender_email() -> String {
    "noreply@kwikeylocksmith.com".to_string()
}

fn default_sender_name() -> String {
    "Kwikey Locksmith".to_string()
}

fn default_notification_email() -> String {
    "info@kwikeylocksmith.com".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            providers: ProviderConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            booking_path: default_booking_path(),
            allowed_origin: default_allowed_origin(),
            trust_forwarded_for: false,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            storage_dir: default_storage_dir(),
            fail_open: default_true(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            recaptcha_secret_key: String::new(),
            recaptcha_verify_url: default_recaptcha_verify_url(),
            smtp2go_api_key: String::new(),
            smtp2go_send_url: default_smtp2go_send_url(),
            smtp2go_timeout_secs: default_smtp2go_timeout_secs(),
            sender_email: default_sender_email(),
            sender_name: default_sender_name(),
            notification_email: default_notification_email(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("recaptcha_secret_key", &"<redacted>")
            .field("recaptcha_verify_url", &self.recaptcha_verify_url)
            .field("smtp2go_api_key", &"<redacted>")
            .field("smtp2go_send_url", &self.smtp2go_send_url)
            .field("smtp2go_timeout_secs", &self.smtp2go_timeout_secs)
            .field("sender_email", &self.sender_email)
            .field("sender_name", &self.sender_name)
            .field("notification_email", &self.notification_email)
            .finish()
    }
}

impl ProviderConfig {
    /// Get the relay request timeout
    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp2go_timeout_secs)
    }

    /// Sender identity in `Name <address>` form.
    pub fn sender(&self) -> String {
        format!("{} <{}>", self.sender_name, self.sender_email)
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        Config {
            server: ServerConfig {
                bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.server.bind_addr),
                booking_path: lookup("BOOKING_PATH").unwrap_or(defaults.server.booking_path),
                allowed_origin: lookup("ALLOWED_ORIGIN")
                    .unwrap_or(defaults.server.allowed_origin),
                trust_forwarded_for: parse_var(&lookup, "TRUST_FORWARDED_FOR")
                    .unwrap_or(defaults.server.trust_forwarded_for),
            },
            rate_limit: RateLimitConfig {
                max_requests: parse_var(&lookup, "RATE_LIMIT_MAX")
                    .unwrap_or(defaults.rate_limit.max_requests),
                window_secs: parse_var(&lookup, "RATE_LIMIT_WINDOW_SECS")
                    .unwrap_or(defaults.rate_limit.window_secs),
                storage_dir: lookup("RATE_LIMIT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.rate_limit.storage_dir),
                fail_open: parse_var(&lookup, "RATE_LIMIT_FAIL_OPEN")
                    .unwrap_or(defaults.rate_limit.fail_open),
            },
            providers: ProviderConfig {
                recaptcha_secret_key: lookup("RECAPTCHA_SECRET_KEY").unwrap_or_default(),
                recaptcha_verify_url: lookup("RECAPTCHA_VERIFY_URL")
                    .unwrap_or(defaults.providers.recaptcha_verify_url),
                smtp2go_api_key: lookup("SMTP2GO_API_KEY").unwrap_or_default(),
                smtp2go_send_url: lookup("SMTP2GO_SEND_URL")
                    .unwrap_or(defaults.providers.smtp2go_send_url),
                smtp2go_timeout_secs: parse_var(&lookup, "SMTP2GO_TIMEOUT_SECS")
                    .unwrap_or(defaults.providers.smtp2go_timeout_secs),
                sender_email: lookup("SENDER_EMAIL").unwrap_or(defaults.providers.sender_email),
                sender_name: lookup("SENDER_NAME").unwrap_or(defaults.providers.sender_name),
                notification_email: lookup("NOTIFICATION_EMAIL")
                    .unwrap_or(defaults.providers.notification_email),
            },
            metrics: MetricsConfig {
                enabled: parse_var(&lookup, "METRICS_ENABLED")
                    .unwrap_or(defaults.metrics.enabled),
                ..defaults.metrics
            },
        }
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let providers = &self.providers;

        if providers.recaptcha_secret_key.trim().is_empty() {
            return Err(ConfigError::Missing("RECAPTCHA_SECRET_KEY"));
        }
        if providers.smtp2go_api_key.trim().is_empty() {
            return Err(ConfigError::Missing("SMTP2GO_API_KEY"));
        }
        if providers.notification_email.trim().is_empty() {
            return Err(ConfigError::Missing("NOTIFICATION_EMAIL"));
        }

        for (name, url) in [
            ("RECAPTCHA_VERIFY_URL", &providers.recaptcha_verify_url),
            ("SMTP2GO_SEND_URL", &providers.smtp2go_send_url),
        ] {
            match Url::parse(url) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => {}
                _ => {
                    return Err(ConfigError::InvalidUrl {
                        name,
                        url: url.clone(),
                    })
                }
            }
        }

        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RATE_LIMIT_MAX",
                value: "0".to_string(),
            });
        }
        if !self.server.booking_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                name: "BOOKING_PATH",
                value: self.server.booking_path.clone(),
            });
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
