//! 通信プロトコル定義
//!
//! Service↔Worker間の通信メッセージ（`POST /validate`, `GET /health`）

use serde::{Deserialize, Serialize};

use crate::types::DiagramType;

/// Validation request body sent to `POST /validate`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    /// Diagram source text
    pub code: String,
    /// Declared diagram type
    pub diagram_type: DiagramType,
}

impl ValidationRequest {
    /// Create a new request.
    pub fn new(code: impl Into<String>, diagram_type: DiagramType) -> Self {
        Self {
            code: code.into(),
            diagram_type,
        }
    }
}

/// A single error or warning reported by the worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "RawDiagnostic")]
pub struct Diagnostic {
    /// Human-readable message
    pub message: String,
    /// 1-based line, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 1-based column, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Diagnostic {
    /// Diagnostic without a location.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }
}

/// Workers report diagnostics either as plain strings or as objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDiagnostic {
    Text(String),
    Detailed {
        #[serde(alias = "error", alias = "msg")]
        message: String,
        #[serde(default)]
        line: Option<u32>,
        #[serde(default, alias = "col")]
        column: Option<u32>,
    },
}

impl From<RawDiagnostic> for Diagnostic {
    fn from(raw: RawDiagnostic) -> Self {
        match raw {
            RawDiagnostic::Text(message) => Self::message(message),
            RawDiagnostic::Detailed {
                message,
                line,
                column,
            } => Self {
                message,
                line,
                column,
            },
        }
    }
}

/// Validation verdict
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    /// Whether the diagram is syntactically valid
    pub valid: bool,
    /// Errors in worker order
    #[serde(default)]
    pub errors: Vec<Diagnostic>,
    /// Warnings in worker order
    #[serde(default)]
    pub warnings: Vec<Diagnostic>,
    /// True when validation was not performed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    /// Why validation was not performed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl ValidationResult {
    /// Result returned when validation was not performed.
    ///
    /// `valid` is true so that callers treating validation as optional proceed.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            skipped: true,
            skip_reason: Some(reason.into()),
        }
    }
}

/// Body of `GET /health`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    /// Worker-reported status ("ok", "healthy", ...)
    #[serde(default)]
    pub status: Option<String>,
    /// Worker version, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_uses_camel_case() {
        let request = ValidationRequest::new("graph TD; A-->B", DiagramType::Flowchart);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["code"], "graph TD; A-->B");
        assert_eq!(json["diagramType"], "flowchart");
    }

    #[test]
    fn test_result_with_mixed_diagnostics() {
        let json = r#"{
            "valid": false,
            "errors": [
                "Parse error on line 2",
                {"message": "Expecting 'SEMI'", "line": 2, "column": 7}
            ],
            "warnings": [{"error": "deprecated keyword", "col": 1}]
        }"#;
        let result: ValidationResult = serde_json::from_str(json).unwrap();

        assert!(!result.valid);
        assert!(!result.skipped);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0], Diagnostic::message("Parse error on line 2"));
        assert_eq!(result.errors[1].line, Some(2));
        assert_eq!(result.errors[1].column, Some(7));
        assert_eq!(result.warnings[0].message, "deprecated keyword");
        assert_eq!(result.warnings[0].column, Some(1));
    }

    #[test]
    fn test_result_defaults_missing_lists() {
        let result: ValidationResult = serde_json::from_str(r#"{"valid": true}"#).unwrap();
        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_result_requires_valid_flag() {
        let parsed = serde_json::from_str::<ValidationResult>(r#"{"errors": []}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_skipped_result() {
        let result = ValidationResult::skipped("validator disabled");
        assert!(result.valid);
        assert!(result.skipped);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["skip_reason"], "validator disabled");
        assert_eq!(json["skipped"], true);
    }

    #[test]
    fn test_health_response_tolerates_unknown_fields() {
        let health: HealthResponse =
            serde_json::from_str(r#"{"status":"ok","uptime":12.5}"#).unwrap();
        assert_eq!(health.status.as_deref(), Some("ok"));
    }
}
