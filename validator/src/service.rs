//! Validator service wiring
//!
//! Builds Config → Supervisor → Monitor → Client in that order and owns the
//! monitor task so shutdown can join it before the worker is stopped.

use mermaid_validator_common::config::ValidatorConfig;
use mermaid_validator_common::error::ValidatorResult;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::ValidationClient;
use crate::health::HealthMonitor;
use crate::shutdown::ShutdownController;
use crate::supervisor::Supervisor;

/// Validator service
pub struct ValidatorService {
    config: Arc<ValidatorConfig>,
    supervisor: Supervisor,
    client: ValidationClient,
    shutdown: ShutdownController,
    monitor: Option<JoinHandle<()>>,
}

impl ValidatorService {
    /// Wire the components; nothing is spawned yet.
    pub fn new(config: Arc<ValidatorConfig>) -> ValidatorResult<Self> {
        let supervisor = Supervisor::new(config.clone())?;
        let client = ValidationClient::new(config.clone(), supervisor.clone())?;
        Ok(Self {
            config,
            supervisor,
            client,
            shutdown: ShutdownController::default(),
            monitor: None,
        })
    }

    /// Start the worker and the health monitor.
    ///
    /// The monitor runs even when the first start fails; it stays idle until
    /// the worker is wanted again. Disabled services start nothing.
    pub async fn start(&mut self) -> ValidatorResult<()> {
        if !self.config.enabled {
            info!("Mermaid validation disabled; worker not started");
            return Ok(());
        }

        let started = self.supervisor.start().await;
        if let Err(e) = &started {
            error!(error = %e, "Failed to start Mermaid validator worker");
        }

        if self.monitor.is_none() {
            let monitor = HealthMonitor::new(self.supervisor.clone())?;
            self.monitor = Some(monitor.spawn(self.shutdown.clone()));
        }
        started
    }

    /// Shared configuration
    pub fn config(&self) -> &Arc<ValidatorConfig> {
        &self.config
    }

    /// Client handed to callers
    pub fn client(&self) -> ValidationClient {
        self.client.clone()
    }

    /// Supervisor handle
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Controller that ends the monitor loop
    pub fn shutdown_controller(&self) -> ShutdownController {
        self.shutdown.clone()
    }

    /// Stop the monitor, join it, then stop the worker.
    pub async fn shutdown(mut self) -> ValidatorResult<()> {
        self.shutdown.request_shutdown();
        if let Some(monitor) = self.monitor.take() {
            if let Err(e) = monitor.await {
                warn!(error = %e, "Health monitor task ended abnormally");
            }
        }
        self.supervisor.stop().await?;
        info!("Mermaid validator service shut down");
        Ok(())
    }
}
