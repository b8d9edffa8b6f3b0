//! 共通型定義
//!
//! Worker状態・ヘルスサンプル・ダイアグラム種別など

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Worker lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// No worker process
    Stopped,
    /// Spawned, waiting for readiness
    Starting,
    /// Accepting validation requests
    Ready,
    /// Readiness cannot be confirmed, process not yet torn down
    Degraded,
    /// Stop-then-start cycle in progress
    Restarting,
    /// Graceful stop in progress
    ShuttingDown,
}

impl WorkerStatus {
    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Restarting => "restarting",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// Returns true while a start, stop or restart is in progress.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Restarting | Self::ShuttingDown
        )
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One health probe observation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSample {
    /// When the probe finished
    pub timestamp: DateTime<Utc>,
    /// Whether `/health` answered successfully
    pub reachable: bool,
    /// Probe round-trip time
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    /// Resident memory of the worker (MB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<f64>,
    /// CPU usage of the worker (percent of one core)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f32>,
}

impl HealthSample {
    /// Sample for a probe that did not reach the worker.
    pub fn unreachable(latency: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            reachable: false,
            latency,
            memory_mb: None,
            cpu_percent: None,
        }
    }

    /// Sample for a probe that reached the worker.
    pub fn reachable(latency: Duration) -> Self {
        Self {
            reachable: true,
            ..Self::unreachable(latency)
        }
    }
}

/// Point-in-time view of the supervisor's worker state
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkerState {
    /// Lifecycle status
    pub status: WorkerStatus,
    /// Child process id while running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Consecutive failed probes since the last success
    pub consecutive_failures: u32,
    /// Start attempts made by the current restart cycle
    pub restart_attempts: u32,
    /// True after a restart cycle gave up; cleared by a manual start
    pub restarts_exhausted: bool,
    /// Most recent probe observation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample: Option<HealthSample>,
}

/// Worker log level passed through `LOG_LEVEL`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace
    Trace,
    /// Debug
    Debug,
    /// Info
    #[default]
    Info,
    /// Warn
    Warn,
    /// Error
    Error,
}

impl LogLevel {
    /// Returns the level as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Declared Mermaid diagram type
///
/// Unknown names are kept verbatim so new diagram kinds reach the worker
/// without a release of this service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DiagramType {
    /// `flowchart` / `graph`
    Flowchart,
    /// `sequenceDiagram`
    Sequence,
    /// `classDiagram`
    Class,
    /// `stateDiagram`
    State,
    /// `erDiagram`
    EntityRelationship,
    /// `gantt`
    Gantt,
    /// `pie`
    Pie,
    /// `journey`
    Journey,
    /// `gitGraph`
    GitGraph,
    /// `mindmap`
    Mindmap,
    /// `timeline`
    Timeline,
    /// Anything else
    Other(String),
}

impl DiagramType {
    /// Returns the Mermaid keyword for this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Flowchart => "flowchart",
            Self::Sequence => "sequenceDiagram",
            Self::Class => "classDiagram",
            Self::State => "stateDiagram",
            Self::EntityRelationship => "erDiagram",
            Self::Gantt => "gantt",
            Self::Pie => "pie",
            Self::Journey => "journey",
            Self::GitGraph => "gitGraph",
            Self::Mindmap => "mindmap",
            Self::Timeline => "timeline",
            Self::Other(name) => name,
        }
    }

    /// Guess the type from the first keyword of the diagram source.
    pub fn detect(source: &str) -> Option<Self> {
        source
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with("%%"))
            .and_then(|line| line.split_whitespace().next())
            .map(Self::from)
    }
}

impl From<&str> for DiagramType {
    fn from(value: &str) -> Self {
        match value {
            "flowchart" | "graph" => Self::Flowchart,
            "sequenceDiagram" | "sequence" => Self::Sequence,
            "classDiagram" | "class" => Self::Class,
            "stateDiagram" | "stateDiagram-v2" | "state" => Self::State,
            "erDiagram" | "er" => Self::EntityRelationship,
            "gantt" => Self::Gantt,
            "pie" => Self::Pie,
            "journey" => Self::Journey,
            "gitGraph" => Self::GitGraph,
            "mindmap" => Self::Mindmap,
            "timeline" => Self::Timeline,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for DiagramType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<DiagramType> for String {
    fn from(value: DiagramType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DiagramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_status_serialization() {
        let json = serde_json::to_string(&WorkerStatus::ShuttingDown).unwrap();
        assert_eq!(json, "\"shutting_down\"");
        assert_eq!(WorkerStatus::ShuttingDown.to_string(), "shutting_down");
    }

    #[test]
    fn test_worker_status_transitioning() {
        assert!(WorkerStatus::Starting.is_transitioning());
        assert!(WorkerStatus::Restarting.is_transitioning());
        assert!(!WorkerStatus::Ready.is_transitioning());
        assert!(!WorkerStatus::Degraded.is_transitioning());
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_diagram_type_aliases() {
        assert_eq!(DiagramType::from("graph"), DiagramType::Flowchart);
        assert_eq!(DiagramType::from("stateDiagram-v2"), DiagramType::State);
        assert_eq!(
            DiagramType::from("sankey-beta"),
            DiagramType::Other("sankey-beta".to_string())
        );
    }

    #[test]
    fn test_diagram_type_serializes_as_keyword() {
        let json = serde_json::to_string(&DiagramType::Sequence).unwrap();
        assert_eq!(json, "\"sequenceDiagram\"");

        let parsed: DiagramType = serde_json::from_str("\"quadrantChart\"").unwrap();
        assert_eq!(parsed, DiagramType::Other("quadrantChart".to_string()));
    }

    #[test]
    fn test_diagram_type_detect_skips_comments() {
        let source = "\n%% generated\nsequenceDiagram\n  A->>B: hi\n";
        assert_eq!(DiagramType::detect(source), Some(DiagramType::Sequence));
        assert_eq!(DiagramType::detect("   \n"), None);
    }

    #[test]
    fn test_health_sample_latency_in_millis() {
        let sample = HealthSample::reachable(Duration::from_millis(42));
        let json = serde_json::to_value(&sample).unwrap();

        assert_eq!(json["latency"], 42);
        assert_eq!(json["reachable"], true);
        assert!(json.get("memory_mb").is_none());
    }
}
