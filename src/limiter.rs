// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Sliding-window rate limiter keyed by caller address.
//!
//! Each identity is hashed with SHA-256 and its recent request timestamps
//! (Unix seconds) are kept in a [`RateLimitStore`]. Every check prunes
//! timestamps that fell out of the window, denies when the remaining count
//! has reached the limit, and otherwise appends `now` and persists.
//!
//! The read-modify-write is not atomic across concurrent requests for the
//! same identity; a burst may slightly exceed the limit.

use crate::config::RateLimitConfig;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Storage failures. Malformed records are not errors; they read as empty.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Rate limit storage unavailable: {0}")]
    Unavailable(#[from] io::Error),
}

/// Persistence for per-identity timestamp lists.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Make sure the storage medium is usable (e.g. create the directory).
    async fn prepare(&self) -> Result<(), StoreError>;

    /// Load the timestamps for `key`. Missing or malformed records are empty.
    async fn load(&self, key: &str) -> Result<Vec<Timestamp>, StoreError>;

    /// Replace the timestamps stored for `key`.
    async fn save(&self, key: &str, timestamps: &[Timestamp]) -> Result<(), StoreError>;
}

/// One JSON file per hashed identity under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl RateLimitStore for FileStore {
    async fn prepare(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Vec<Timestamp>, StoreError> {
        let raw = match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                debug!(error = %e, "Unreadable rate limit record, treating as empty");
                return Ok(Vec::new());
            }
        };

        match serde_json::from_str::<Vec<Timestamp>>(&raw) {
            Ok(timestamps) => Ok(timestamps),
            Err(e) => {
                debug!(error = %e, "Malformed rate limit record, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, key: &str, timestamps: &[Timestamp]) -> Result<(), StoreError> {
        let body = serde_json::to_vec(timestamps).map_err(io::Error::from)?;
        tokio::fs::write(self.path_for(key), body).await?;
        Ok(())
    }
}

/// In-process store; suitable for a single instance or for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Vec<Timestamp>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn prepare(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Vec<Timestamp>, StoreError> {
        Ok(self.records.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn save(&self, key: &str, timestamps: &[Timestamp]) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(key.to_string(), timestamps.to_vec());
        Ok(())
    }
}

/// Source of "now" in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed {
        /// Remaining requests in current window
        remaining: u32,
    },
    /// Request is rate limited
    Limited {
        /// Reason for rate limiting
        reason: RateLimitReason,
        /// Time until the oldest counted request leaves the window
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

/// Reason for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    /// Identity reached the limit within the window
    WindowExceeded,
    /// Storage failed and the limiter is configured fail-closed
    StorageUnavailable,
}

impl std::fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WindowExceeded => write!(f, "Request limit reached for window"),
            Self::StorageUnavailable => write!(f, "Rate limit storage unavailable"),
        }
    }
}

/// Storage key for an identity: lowercase hex SHA-256.
///
/// Keeps raw addresses off disk and makes every key a safe file name.
pub fn identity_key(identity: &str) -> String {
    format!("{:x}", Sha256::digest(identity.as_bytes()))
}

/// Per-identity sliding-window limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter over the given store using the wall clock.
    pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            config,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a limiter backed by files under `config.storage_dir`.
    pub fn file_backed(config: RateLimitConfig) -> Self {
        let store = Arc::new(FileStore::new(config.storage_dir.clone()));
        Self::new(config, store)
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or deny `identity` using the configured limit and window.
    pub async fn is_allowed(&self, identity: &str) -> bool {
        self.check(identity).await.is_allowed()
    }

    /// Admit or deny `identity` with an explicit limit and window.
    pub async fn is_allowed_with(&self, identity: &str, limit: u32, window_secs: u64) -> bool {
        self.check_with(identity, limit, window_secs)
            .await
            .is_allowed()
    }

    /// Check `identity` against the configured limit and window.
    pub async fn check(&self, identity: &str) -> RateLimitResult {
        self.check_with(identity, self.config.max_requests, self.config.window_secs)
            .await
    }

    /// Check `identity`, recording the request when it is admitted.
    pub async fn check_with(&self, identity: &str, limit: u32, window_secs: u64) -> RateLimitResult {
        if let Err(e) = self.store.prepare().await {
            return self.on_storage_failure(&e, limit);
        }

        let key = identity_key(identity);
        let now = self.clock.now();
        let window = i64::try_from(window_secs).unwrap_or(i64::MAX);

        let mut timestamps = match self.store.load(&key).await {
            Ok(timestamps) => timestamps,
            Err(e) => return self.on_storage_failure(&e, limit),
        };
        timestamps.retain(|ts| now.saturating_sub(*ts) < window);

        let count = timestamps.len();
        if count >= limit as usize {
            let oldest = timestamps.iter().copied().min().unwrap_or(now);
            let retry_secs = oldest.saturating_add(window).saturating_sub(now).max(0);
            debug!(key = %key, count, limit, retry_secs, "Rate limit reached");
            return RateLimitResult::Limited {
                reason: RateLimitReason::WindowExceeded,
                retry_after: Duration::from_secs(retry_secs as u64),
            };
        }

        timestamps.push(now);
        if let Err(e) = self.store.save(&key, &timestamps).await {
            return self.on_storage_failure(&e, limit);
        }

        RateLimitResult::Allowed {
            remaining: limit.saturating_sub(timestamps.len() as u32),
        }
    }

    fn on_storage_failure(&self, err: &StoreError, limit: u32) -> RateLimitResult {
        if self.config.fail_open {
            warn!(error = %err, "Rate limit storage failed, admitting request");
            RateLimitResult::Allowed {
                remaining: limit.saturating_sub(1),
            }
        } else {
            warn!(error = %err, "Rate limit storage failed, rejecting request");
            RateLimitResult::Limited {
                reason: RateLimitReason::StorageUnavailable,
                retry_after: Duration::ZERO,
            }
        }
    }
}
