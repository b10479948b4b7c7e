//! Read proxy: answers purchase reads by delegating to the ledger service.

use axum::body::Bytes;
use reqwest::Client;
use serde::de::IgnoredAny;
use std::time::Duration;
use thiserror::Error;

/// Errors from the read proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The ledger could not be reached or did not answer successfully
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Forwards `GET /purchases?userId=…` to the ledger and returns its body
/// byte for byte.
///
/// Holds no state besides the pooled HTTP client; nothing is cached.
#[derive(Clone, Debug)]
pub struct ReadProxy {
    client: Client,
    base_url: String,
}

impl ReadProxy {
    /// Create a proxy for the ledger at `base_url`, bounding each request by
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Client`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch all purchases of `user_id` from the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::UpstreamUnavailable`] on connection failure,
    /// timeout, a non-success status, or a body that is not JSON.
    pub async fn get_purchases_for_user(&self, user_id: &str) -> Result<Bytes, ProxyError> {
        let response = self
            .client
            .get(format!("{}/purchases", self.base_url))
            .query(&[("userId", user_id)])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(upstream = %self.base_url, error = %e, "Upstream request failed");
                ProxyError::UpstreamUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(upstream = %self.base_url, %status, "Upstream returned an error status");
            return Err(ProxyError::UpstreamUnavailable(format!(
                "upstream returned {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("upstream body: {e}")))?;

        // Checked for well-formedness only; the bytes go out untouched.
        serde_json::from_slice::<IgnoredAny>(&body)
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("invalid upstream body: {e}")))?;

        Ok(body)
    }
}
