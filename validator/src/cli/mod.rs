//! CLI module for mermaid-validator
//!
//! Provides command-line entry points for running and exercising the worker.

pub mod check;
pub mod config;
pub mod serve;

use clap::{Parser, Subcommand};

/// Mermaid validator - supervised Node.js worker for Mermaid syntax validation
#[derive(Parser, Debug)]
#[command(name = "mermaid-validator")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    MERMAID_VALIDATOR_ENABLED                   Enable validation (default: true)
    MERMAID_VALIDATOR_HOST                      Worker host (default: 127.0.0.1)
    MERMAID_VALIDATOR_PORT                      Worker port (default: 3001)
    MERMAID_VALIDATOR_SCRIPT_PATH               Worker script (default: mermaid-validator/server.js)
    MERMAID_VALIDATOR_INTERPRETER               Worker interpreter (default: node)
    MERMAID_VALIDATOR_STARTUP_TIMEOUT           Seconds until ready (default: 30)
    MERMAID_VALIDATOR_TIMEOUT                   Seconds per validation (default: 10)
    MERMAID_VALIDATOR_SHUTDOWN_TIMEOUT          Seconds before force kill (default: 5)
    MERMAID_VALIDATOR_HEALTH_CHECK_TIMEOUT      Seconds per probe (default: 5)
    MERMAID_VALIDATOR_HEALTH_CHECK_INTERVAL     Seconds between probes (default: 30)
    MERMAID_VALIDATOR_MAX_RETRIES               Retries and restart attempts (default: 3)
    MERMAID_VALIDATOR_RETRY_DELAY               Seconds between retries (default: 1)
    MERMAID_VALIDATOR_MAX_CONSECUTIVE_FAILURES  Failed probes before restart (default: 3)
    MERMAID_VALIDATOR_MAX_MEMORY_MB             Worker memory ceiling (default: 512)
    MERMAID_VALIDATOR_MAX_CPU_PERCENT           Worker CPU ceiling (default: 90)
    MERMAID_VALIDATOR_LOG_LEVEL                 Log level (default: info)
    MERMAID_VALIDATOR_LOG_DIR                   Also write daily log files here
"#)]
pub struct Cli {
    /// Subcommand to execute (default: serve)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the worker and health monitor until Ctrl+C / SIGTERM
    Serve(serve::ServeArgs),
    /// Validate a single diagram file
    Check(check::CheckArgs),
    /// Print the resolved configuration as JSON
    Config(config::ConfigArgs),
}
