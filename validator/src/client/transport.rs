//! Worker transport
//!
//! `ValidationTransport` is the seam between the client's retry/timeout
//! policy and the wire. `HttpTransport` speaks the worker's JSON API.

use async_trait::async_trait;
use mermaid_validator_common::config::ValidatorConfig;
use mermaid_validator_common::error::{ValidatorError, ValidatorResult};
use mermaid_validator_common::protocol::{ValidationRequest, ValidationResult};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Error body excerpt kept in `TransportError::Status`
const MAX_ERROR_BODY: usize = 512;

/// Transport-level failure of a single attempt
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Connection refused, reset or otherwise not established
    #[error("connection failed: {0}")]
    Connect(String),

    /// The attempt ran out of time
    #[error("request timed out")]
    Timeout,

    /// Unexpected HTTP status
    #[error("worker returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body excerpt
        body: String,
    },

    /// Body was not a validation result
    #[error("malformed worker response: {0}")]
    Decode(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Worth another attempt after `retry_delay`
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connect(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() || e.is_request() {
            TransportError::Connect(e.to_string())
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// One validation round trip to the worker
#[async_trait]
pub trait ValidationTransport: Send + Sync {
    /// Send `request`, giving up after `timeout`.
    async fn validate(
        &self,
        request: &ValidationRequest,
        timeout: Duration,
    ) -> Result<ValidationResult, TransportError>;
}

/// HTTP transport (`POST /validate`)
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    /// Transport for the worker described by `config`.
    pub fn new(config: &ValidatorConfig) -> ValidatorResult<Self> {
        let client = Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| ValidatorError::Worker(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/validate", config.base_url()),
        })
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ValidationTransport for HttpTransport {
    async fn validate(
        &self,
        request: &ValidationRequest,
        timeout: Duration,
    ) -> Result<ValidationResult, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        trace!(url = %self.url, status = status.as_u16(), bytes = body.len(), "Worker responded");

        if status.is_success() {
            return serde_json::from_slice::<ValidationResult>(&body)
                .map_err(|e| TransportError::Decode(e.to_string()));
        }

        // Some workers answer invalid diagrams with 400 and a regular result body.
        if status.is_client_error() {
            if let Ok(result) = serde_json::from_slice::<ValidationResult>(&body) {
                return Ok(result);
            }
        }

        let mut excerpt = String::from_utf8_lossy(&body).into_owned();
        if excerpt.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !excerpt.is_char_boundary(cut) {
                cut -= 1;
            }
            excerpt.truncate(cut);
        }
        Err(TransportError::Status {
            status: status.as_u16(),
            body: excerpt,
        })
    }
}
