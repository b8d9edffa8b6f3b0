//! Worker readiness probe
//!
//! `GET /health` against the worker. Any 2xx answer counts as healthy unless
//! the body explicitly reports an unhealthy status.

use mermaid_validator_common::config::ValidatorConfig;
use mermaid_validator_common::error::{ValidatorError, ValidatorResult};
use mermaid_validator_common::protocol::HealthResponse;
use reqwest::Client;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::trace;

/// Why a probe failed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProbeError {
    /// No answer within the probe timeout
    #[error("health probe timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The worker could not be reached
    #[error("health probe could not connect: {0}")]
    Unreachable(String),

    /// Non-2xx status
    #[error("health probe returned HTTP {0}")]
    Status(u16),

    /// 2xx with an unhealthy status in the body
    #[error("worker reports status '{0}'")]
    Unhealthy(String),
}

/// Readiness probe bound to one worker endpoint
#[derive(Clone, Debug)]
pub struct HealthProbe {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HealthProbe {
    /// Probe for the worker described by `config`.
    pub fn new(config: &ValidatorConfig) -> ValidatorResult<Self> {
        let client = Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| ValidatorError::Worker(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/health", config.base_url()),
            timeout: config.health_check_timeout,
        })
    }

    /// Probe URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one probe; returns the round-trip latency on success.
    pub async fn check(&self) -> Result<Duration, ProbeError> {
        let start = Instant::now();

        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(self.timeout)
                } else {
                    ProbeError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        // Workers that answer with an empty or non-JSON body are healthy.
        if let Ok(body) = response.json::<HealthResponse>().await {
            if let Some(reported) = body.status {
                if is_unhealthy_status(&reported) {
                    return Err(ProbeError::Unhealthy(reported));
                }
            }
        }

        let latency = start.elapsed();
        trace!(url = %self.url, latency_ms = latency.as_millis() as u64, "Health probe succeeded");
        Ok(latency)
    }
}

fn is_unhealthy_status(status: &str) -> bool {
    matches!(
        status.to_ascii_lowercase().as_str(),
        "error" | "unhealthy" | "fail" | "failed" | "down"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn config_for(server: &MockServer) -> ValidatorConfig {
        let address = server.address();
        let mut config = ValidatorConfig::new(PathBuf::from(env!("CARGO_MANIFEST_DIR")))
            .expect("manifest dir exists");
        config.host = address.ip().to_string();
        config.port = address.port();
        config.health_check_timeout = Duration::from_millis(200);
        config
    }

    #[tokio::test]
    async fn probe_succeeds_on_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
            .mount(&server)
            .await;

        let probe = HealthProbe::new(&config_for(&server)).unwrap();
        assert!(probe.check().await.is_ok());
        assert!(probe.url().ends_with("/health"));
    }

    #[tokio::test]
    async fn probe_accepts_plain_text_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;

        let probe = HealthProbe::new(&config_for(&server)).unwrap();
        assert!(probe.check().await.is_ok());
    }

    #[tokio::test]
    async fn probe_fails_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HealthProbe::new(&config_for(&server)).unwrap();
        assert_eq!(probe.check().await, Err(ProbeError::Status(503)));
    }

    #[tokio::test]
    async fn probe_fails_on_reported_unhealthy_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "unhealthy"})),
            )
            .mount(&server)
            .await;

        let probe = HealthProbe::new(&config_for(&server)).unwrap();
        assert_eq!(
            probe.check().await,
            Err(ProbeError::Unhealthy("unhealthy".to_string()))
        );
    }

    #[tokio::test]
    async fn probe_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let probe = HealthProbe::new(&config_for(&server)).unwrap();
        assert_eq!(
            probe.check().await,
            Err(ProbeError::Timeout(Duration::from_millis(200)))
        );
    }
}
