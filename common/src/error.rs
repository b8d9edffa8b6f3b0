//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! # 構造化エラー詳細
//!
//! `ValidatorError`は`detail()`メソッドを提供し、ルーター層がそのまま
//! レスポンスに載せられる`ErrorDetail`を生成できます。

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Configuration error
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// The worker script does not exist on disk
    #[error("Validator script not found: {0}")]
    ScriptNotFound(String),

    /// A value could not be parsed
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Environment key
        key: String,
        /// Raw value
        value: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A value that must be positive is zero or negative
    #[error("{0} must be positive")]
    NonPositive(String),
}

/// Validator error type
///
/// The enum itself is the base kind; `Worker` is the catch-all for malformed or
/// unexpected worker responses.
#[derive(Debug, Clone, Error)]
pub enum ValidatorError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Worker could not be spawned or did not become ready in time
    #[error("Validator subprocess failed to start: {reason}")]
    SubprocessStartup {
        /// What went wrong
        reason: String,
        /// Whether the startup deadline elapsed
        timed_out: bool,
    },

    /// Worker is not ready to accept requests
    #[error("Validator subprocess unavailable: {0}")]
    SubprocessUnavailable(String),

    /// A validation call exceeded its deadline
    #[error("Validation timed out after {}ms", .0.as_millis())]
    ValidationTimeout(Duration),

    /// Malformed or unexpected worker response
    #[error("Mermaid validator error: {0}")]
    Worker(String),
}

/// エラーカテゴリ
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration problem
    Configuration,
    /// Worker startup failure
    Startup,
    /// Worker not available
    Unavailable,
    /// Deadline exceeded
    Timeout,
    /// Unexpected worker response
    Worker,
}

/// 構造化エラー詳細
///
/// # Example
///
/// ```json
/// {
///   "category": "timeout",
///   "user_message": "Diagram validation took too long",
///   "technical_detail": "Validation timed out after 10000ms",
///   "suggestions": ["Simplify the diagram or retry later"]
/// }
/// ```
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorDetail {
    /// Error category
    pub category: ErrorCategory,
    /// Message safe to show to end users
    pub user_message: String,
    /// Full technical description (logs only)
    pub technical_detail: String,
    /// Hints for resolving the problem
    pub suggestions: Vec<String>,
}

impl ValidatorError {
    /// Shorthand for a startup failure that did not time out.
    pub fn startup(reason: impl Into<String>) -> Self {
        Self::SubprocessStartup {
            reason: reason.into(),
            timed_out: false,
        }
    }

    /// Shorthand for an unavailable worker.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::SubprocessUnavailable(reason.into())
    }

    /// Returns the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::SubprocessStartup { .. } => ErrorCategory::Startup,
            Self::SubprocessUnavailable(_) => ErrorCategory::Unavailable,
            Self::ValidationTimeout(_) => ErrorCategory::Timeout,
            Self::Worker(_) => ErrorCategory::Worker,
        }
    }

    /// Returns true if retrying the operation later may succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }

    /// Returns true if the caller should proceed without validation.
    ///
    /// Unavailability and timeouts mean no verdict was produced; the document
    /// workflow treats validation as optional in that case.
    pub fn should_skip_validation(&self) -> bool {
        matches!(
            self,
            Self::SubprocessUnavailable(_)
                | Self::SubprocessStartup { .. }
                | Self::ValidationTimeout(_)
        )
    }

    /// Returns a message that does not expose internal details.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Config(_) => "Diagram validation is misconfigured",
            Self::SubprocessStartup { .. } => "Diagram validator could not be started",
            Self::SubprocessUnavailable(_) => "Diagram validator is temporarily unavailable",
            Self::ValidationTimeout(_) => "Diagram validation took too long",
            Self::Worker(_) => "Diagram validator returned an unexpected response",
        }
    }

    fn suggestions(&self) -> Vec<String> {
        let items: &[&str] = match self {
            Self::Config(ConfigError::ScriptNotFound(_)) => &[
                "Set MERMAID_VALIDATOR_SCRIPT_PATH to the worker script",
                "Set MERMAID_VALIDATOR_ENABLED=false to run without validation",
            ],
            Self::Config(_) => &["Check the MERMAID_VALIDATOR_* environment variables"],
            Self::SubprocessStartup {
                timed_out: true, ..
            } => &[
                "Increase MERMAID_VALIDATOR_STARTUP_TIMEOUT",
                "Check the worker log output for startup errors",
            ],
            Self::SubprocessStartup { .. } => &[
                "Check that the interpreter is installed and on PATH",
                "Check the worker script permissions",
            ],
            Self::SubprocessUnavailable(_) => &["Retry later or proceed without validation"],
            Self::ValidationTimeout(_) => &[
                "Simplify the diagram or retry later",
                "Increase MERMAID_VALIDATOR_TIMEOUT",
            ],
            Self::Worker(_) => &["Check that the worker version matches this service"],
        };
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Converts this error to a structured detail.
    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            category: self.category(),
            user_message: self.user_message().to_string(),
            technical_detail: self.to_string(),
            suggestions: self.suggestions(),
        }
    }
}

/// Result type alias
pub type ValidatorResult<T> = Result<T, ValidatorError>;
