//! Mermaid validator
//!
//! Node.js製Mermaid検証Workerをサブプロセスとして起動・監視し、
//! ルーター層へ検証APIを提供する

#![warn(missing_docs)]

/// バリデーションクライアント（リトライ・タイムアウト）
pub mod client;

/// CLI定義
pub mod cli;

/// ライフサイクルイベントバス
pub mod events;

/// ヘルスチェック監視
pub mod health;

/// ロギング初期化ユーティリティ
pub mod logging;

/// サービス実行ループとシグナル処理
pub mod server;

/// コンポーネントの組み立て
pub mod service;

/// Cooperative shutdown control
pub mod shutdown;

/// Workerプロセスのライフサイクル管理
pub mod supervisor;

pub use client::ValidationClient;
pub use mermaid_validator_common::config::{ConfigLoader, ValidatorConfig};
pub use mermaid_validator_common::error::{ValidatorError, ValidatorResult};
pub use mermaid_validator_common::protocol::ValidationResult;
pub use mermaid_validator_common::types::{DiagramType, WorkerStatus};
pub use service::ValidatorService;
pub use supervisor::Supervisor;
