//! serve サブコマンド
//!
//! Workerとヘルスモニターを起動し、シグナルを受けるまで常駐します。

use crate::server;
use crate::service::ValidatorService;
use clap::Args;
use mermaid_validator_common::config::ValidatorConfig;
use std::sync::Arc;

/// serve サブコマンドの引数
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {}

/// serve コマンドを実行
pub async fn execute(_args: &ServeArgs, config: Arc<ValidatorConfig>) -> Result<(), anyhow::Error> {
    let service = ValidatorService::new(config)?;
    server::run(service).await?;
    Ok(())
}
