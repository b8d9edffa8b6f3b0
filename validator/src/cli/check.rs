//! check サブコマンド
//!
//! Workerを起動して1ファイルを検証し、結果をJSONで出力してから停止します。

use anyhow::Context;
use clap::Args;
use mermaid_validator_common::config::ValidatorConfig;
use mermaid_validator_common::types::DiagramType;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::client::ValidationClient;
use crate::supervisor::Supervisor;

/// check サブコマンドの引数
#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Diagram file to validate
    pub file: PathBuf,

    /// Diagram type (detected from the first keyword if omitted)
    #[arg(short = 't', long = "type")]
    pub diagram_type: Option<String>,
}

/// check コマンドを実行
///
/// 図が有効（またはスキップ）なら `true`
pub async fn execute(args: &CheckArgs, config: Arc<ValidatorConfig>) -> Result<bool, anyhow::Error> {
    let code = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let diagram_type = resolve_type(args.diagram_type.as_deref(), &code, &args.file);

    let supervisor = Supervisor::new(config.clone())?;
    let client = ValidationClient::new(config.clone(), supervisor.clone())?;

    if config.enabled {
        supervisor.start().await?;
    }
    let result = client.validate(&code, diagram_type).await;
    if let Err(e) = supervisor.stop().await {
        warn!(error = %e, "Failed to stop worker");
    }

    let result = result?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.valid)
}

fn resolve_type(explicit: Option<&str>, code: &str, file: &Path) -> DiagramType {
    if let Some(name) = explicit {
        return DiagramType::from(name);
    }
    DiagramType::detect(code).unwrap_or_else(|| {
        warn!(file = %file.display(), "Could not detect diagram type, assuming flowchart");
        DiagramType::Flowchart
    })
}
