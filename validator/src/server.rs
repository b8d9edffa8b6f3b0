//! サービス実行ループ
//!
//! Workerとヘルスモニターを起動し、Ctrl+C / SIGTERM / シャットダウン要求を待って
//! 順に停止する。

use crate::service::ValidatorService;
use crate::shutdown::ShutdownController;
use mermaid_validator_common::error::ValidatorResult;
use tracing::{error, info};

/// サービスを起動し、シャットダウンシグナルまで実行
pub async fn run(mut service: ValidatorService) -> ValidatorResult<()> {
    if let Err(e) = service.start().await {
        service.shutdown().await?;
        return Err(e);
    }
    info!(
        url = %service.config().base_url(),
        "Mermaid validator running; press Ctrl+C to stop"
    );

    shutdown_signal(service.shutdown_controller()).await;
    service.shutdown().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// シャットダウンシグナルを待機
async fn shutdown_signal(shutdown: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = shutdown.wait() => {
            info!("Shutdown requested, shutting down...");
        }
    }
}
