// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outbound HTTP used by the verification and relay clients.
//!
//! Both providers are reached through [`HttpTransport`] so the request
//! pipeline can run against fakes without network access.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure to get any HTTP response at all.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// A completed HTTP exchange, whatever its status.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Capability to send one POST and hand back the raw response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST an `application/x-www-form-urlencoded` body.
    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<TransportResponse, TransportError>;

    /// POST a JSON body, optionally bounded by `timeout`.
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<TransportResponse, TransportError>;
}

/// Production transport over a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn collect(response: reqwest::Response) -> Result<TransportResponse, TransportError> {
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(TransportResponse::new(status, body.to_vec()))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<TransportResponse, TransportError> {
        let response = self.client.post(url).form(fields).send().await?;
        Self::collect(response).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        Self::collect(response).await
    }
}
