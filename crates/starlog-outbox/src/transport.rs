//! Transport seam for collector uploads.
//!
//! The delivery loop never retries inside a single call; retries happen only
//! through the scheduler's own pause/re-trigger cycle.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Transport failure classes.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network or timeout failure: the collector was never reached.
    #[error("cannot connect to the collector: {0}")]
    Connect(String),

    /// The collector answered with a non-success HTTP status.
    #[error("collector returned HTTP {status}")]
    Status {
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },

    /// Any other failure during the upload.
    #[error("upload failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether this is the network/timeout class of failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

/// Response from a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    /// Whether the status code is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstract "post a JSON body" capability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post `body` to `url`, bounded by `timeout`.
    ///
    /// Returns the response for any completed exchange (including error
    /// statuses); `Err` means the exchange itself failed.
    async fn post(
        &self,
        url: &str,
        body: String,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// Reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        body: String,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        debug!(url = %url, bytes = body.len(), "Posting telemetry");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::Other(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(TransportResponse { status, body })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_success_range() {
        let ok = TransportResponse {
            status: 200,
            body: String::new(),
        };
        let created = TransportResponse {
            status: 201,
            body: String::new(),
        };
        let bad = TransportResponse {
            status: 400,
            body: String::new(),
        };
        let redirect = TransportResponse {
            status: 302,
            body: String::new(),
        };

        assert!(ok.is_success());
        assert!(created.is_success());
        assert!(!bad.is_success());
        assert!(!redirect.is_success());
    }

    #[test]
    fn connectivity_classification() {
        assert!(TransportError::Connect("refused".into()).is_connectivity());
        assert!(!TransportError::Status {
            status: 500,
            body: String::new()
        }
        .is_connectivity());
        assert!(!TransportError::Other("boom".into()).is_connectivity());
    }
}
