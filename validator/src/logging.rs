//! ロギング初期化
//!
//! `RUST_LOG` があればそれを優先し、なければ設定のログレベルを使う。
//! 出力は常にstderr（`check` のJSON出力を汚さないため）。
//! `MERMAID_VALIDATOR_LOG_DIR` が設定されていれば日次ローテーションのファイルにも書く。

use anyhow::Context;
use mermaid_validator_common::config::get_env;
use mermaid_validator_common::types::LogLevel;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ログファイル名のプレフィックス
pub const LOG_FILE_NAME: &str = "mermaid-validator.log";

/// ファイル出力のフラッシュを保証するガード。プロセス終了まで保持する。
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// `LOG_DIR` 環境変数からログディレクトリを取得
pub fn log_dir_from_env() -> Option<PathBuf> {
    get_env("LOG_DIR").map(PathBuf::from)
}

/// グローバルsubscriberを初期化
pub fn init(level: LogLevel, log_dir: Option<&Path>) -> anyhow::Result<LoggingGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = file_writer(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("failed to initialize logging")?;

    Ok(LoggingGuard { _file: guard })
}

fn file_writer(dir: &Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_file_writer_creates_rotated_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let (writer, guard) = file_writer(&log_dir).unwrap();

        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("worker spawned for test");
        });
        drop(guard);

        let contents: String = std::fs::read_dir(&log_dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_NAME))
            .map(|entry| std::fs::read_to_string(entry.path()).unwrap())
            .collect();
        assert!(contents.contains("worker spawned for test"));
    }

    #[test]
    #[serial]
    fn test_log_dir_from_env() {
        std::env::remove_var("MERMAID_VALIDATOR_LOG_DIR");
        assert_eq!(log_dir_from_env(), None);

        std::env::set_var("MERMAID_VALIDATOR_LOG_DIR", "/var/log/mermaid");
        assert_eq!(log_dir_from_env(), Some(PathBuf::from("/var/log/mermaid")));
        std::env::remove_var("MERMAID_VALIDATOR_LOG_DIR");
    }
}
