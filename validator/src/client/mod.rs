//! バリデーションクライアント
//!
//! ルーター層から呼ばれる唯一の入口。Workerが `Ready` のときだけ送信し、
//! 接続失敗は `retry_delay` 間隔で再試行する。期限は再試行を含む呼び出し全体に
//! 適用される。

pub mod transport;

pub use transport::{HttpTransport, TransportError, ValidationTransport};

use mermaid_validator_common::config::ValidatorConfig;
use mermaid_validator_common::error::{ValidatorError, ValidatorResult};
use mermaid_validator_common::protocol::{ValidationRequest, ValidationResult};
use mermaid_validator_common::types::DiagramType;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::supervisor::Supervisor;

/// Mermaid検証クライアント
#[derive(Clone)]
pub struct ValidationClient {
    config: Arc<ValidatorConfig>,
    supervisor: Supervisor,
    transport: Arc<dyn ValidationTransport>,
}

impl ValidationClient {
    /// HTTPトランスポートでクライアントを作成
    pub fn new(config: Arc<ValidatorConfig>, supervisor: Supervisor) -> ValidatorResult<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, supervisor, Arc::new(transport)))
    }

    /// 任意のトランスポートでクライアントを作成
    pub fn with_transport(
        config: Arc<ValidatorConfig>,
        supervisor: Supervisor,
        transport: Arc<dyn ValidationTransport>,
    ) -> Self {
        Self {
            config,
            supervisor,
            transport,
        }
    }

    /// `request_timeout` で検証
    pub async fn validate(
        &self,
        code: &str,
        diagram_type: DiagramType,
    ) -> ValidatorResult<ValidationResult> {
        self.validate_with_timeout(code, diagram_type, self.config.request_timeout)
            .await
    }

    /// Validate with an explicit deadline covering every attempt.
    pub async fn validate_with_timeout(
        &self,
        code: &str,
        diagram_type: DiagramType,
        timeout: Duration,
    ) -> ValidatorResult<ValidationResult> {
        if !self.config.enabled {
            debug!("Mermaid validation disabled, skipping");
            return Ok(ValidationResult::skipped("validator disabled"));
        }

        let Some(ticket) = self.supervisor.begin_request() else {
            return Err(ValidatorError::unavailable(format!(
                "worker is {}",
                self.supervisor.status()
            )));
        };

        let request = ValidationRequest::new(code, diagram_type);
        let deadline = Instant::now() + timeout;

        tokio::select! {
            result = tokio::time::timeout_at(deadline, self.send_with_retry(&request, deadline, timeout)) => {
                result.unwrap_or(Err(ValidatorError::ValidationTimeout(timeout)))
            }
            _ = ticket.aborted() => Err(ValidatorError::unavailable(
                "worker stopped while validation was in flight",
            )),
        }
    }

    async fn send_with_retry(
        &self,
        request: &ValidationRequest,
        deadline: Instant,
        timeout: Duration,
    ) -> ValidatorResult<ValidationResult> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.validate(request, remaining).await {
                Ok(result) => {
                    debug!(
                        attempt,
                        valid = result.valid,
                        errors = result.errors.len(),
                        "Validation completed"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_transient() => {
                    warn!(attempt, attempts, error = %e, "Worker unreachable");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
                Err(TransportError::Timeout) => {
                    return Err(ValidatorError::ValidationTimeout(timeout));
                }
                Err(e) => return Err(ValidatorError::Worker(e.to_string())),
            }
        }

        Err(ValidatorError::unavailable(match last_error {
            Some(e) => format!("worker unreachable after {} attempts: {}", attempts, e),
            None => format!("worker unreachable after {} attempts", attempts),
        }))
    }
}
