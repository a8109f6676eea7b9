//! Thin cross-service HTTP client.
//!
//! Every edge in the dependency graph (Alert Ingestion → Incident Management
//! → On-Call / Notification) goes through this client: a bounded-timeout
//! `reqwest::Client`, `X-Request-ID` propagation, and — for the one call site
//! that needs it (Alert Ingestion's incident-creation fallback) — a bounded
//! retry budget with short exponential backoff.

use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::middleware::REQUEST_ID_HEADER;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request to {0} timed out or could not connect: {1}")]
    Unreachable(String, String),
    #[error("{0} responded with status {1}")]
    Status(String, u16),
    #[error("failed to decode response from {0}: {1}")]
    Decode(String, String),
}

/// A `reqwest::Client` scoped to one downstream base URL with a fixed
/// per-call deadline.
#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ServiceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build is infallible with default tls backend");
        Self {
            http,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// POST `path` with a JSON body, decoding a JSON response.
    pub async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        request_id: &str,
    ) -> Result<R, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header(REQUEST_ID_HEADER, request_id)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Unreachable(url.clone(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::Status(url, response.status().as_u16()));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ClientError::Decode(url, e.to_string()))
    }

    /// GET `path` (with an already-encoded query string), decoding JSON.
    pub async fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        request_id: &str,
    ) -> Result<R, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .header(REQUEST_ID_HEADER, request_id)
            .send()
            .await
            .map_err(|e| ClientError::Unreachable(url.clone(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::Status(url, response.status().as_u16()));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ClientError::Decode(url, e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Retry budget for the one fallback-sensitive call (alert ingestion's
/// incident-creation request): a small, fixed number of attempts with short
/// exponential backoff, never a generic retry policy.
pub struct RetryBudget {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryBudget {
    pub async fn run<F, Fut, T>(&self, mut attempt: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ClientError>>,
    {
        let mut last_err = None;
        for n in 0..self.max_attempts {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_err = Some(e);
                    if n + 1 < self.max_attempts {
                        let delay = self.base_delay * 2u32.pow(n);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }
}
