//! Configuration management via environment variables
//!
//! All settings live under the `MERMAID_VALIDATOR_` prefix and are validated
//! once into an immutable [`ValidatorConfig`] that is handed to every
//! component by `Arc`.

use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::LogLevel;

/// Prefix shared by every environment variable of this service
pub const ENV_PREFIX: &str = "MERMAID_VALIDATOR_";

/// Build the full environment variable name for a setting
///
/// # Example
/// ```
/// use mermaid_validator_common::config::env_key;
///
/// assert_eq!(env_key("PORT"), "MERMAID_VALIDATOR_PORT");
/// ```
pub fn env_key(name: &str) -> String {
    format!("{}{}", ENV_PREFIX, name)
}

/// Get a prefixed environment variable
///
/// Empty values are treated as unset.
pub fn get_env(name: &str) -> Option<String> {
    std::env::var(env_key(name))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Get a prefixed environment variable with a default value
pub fn get_env_or(name: &str, default: &str) -> String {
    get_env(name).unwrap_or_else(|| default.to_string())
}

/// Validated service settings
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidatorConfig {
    /// When false every validation is skipped without I/O
    pub enabled: bool,
    /// Worker bind host
    pub host: String,
    /// Worker bind port
    pub port: u16,
    /// Deadline for the worker to answer `/health` after spawn
    pub startup_timeout: Duration,
    /// Default deadline of one validation call
    pub request_timeout: Duration,
    /// Grace period between SIGTERM and forced kill
    pub shutdown_timeout: Duration,
    /// Deadline of one health probe
    pub health_check_timeout: Duration,
    /// Transport retries per call, and start attempts per restart cycle
    pub max_retries: u32,
    /// Delay between retries (base of the restart backoff)
    pub retry_delay: Duration,
    /// Period of the health monitor
    pub health_check_interval: Duration,
    /// Failed probes that trigger a restart
    pub max_consecutive_failures: u32,
    /// Memory ceiling of the worker (MB)
    pub max_memory_mb: u64,
    /// CPU ceiling of the worker (percent)
    pub max_cpu_percent: f32,
    /// Worker entry point
    pub script_path: PathBuf,
    /// Program that runs the script
    pub interpreter: String,
    /// Log level passed to the worker
    pub log_level: LogLevel,
}

impl ValidatorConfig {
    /// Configuration with default values for the given script.
    ///
    /// Fails if the script does not exist.
    pub fn new(script_path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let config = Self::with_defaults(script_path.into());
        config.validate()?;
        Ok(config)
    }

    fn with_defaults(script_path: PathBuf) -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 3001,
            startup_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            health_check_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(30),
            max_consecutive_failures: 3,
            max_memory_mb: 512,
            max_cpu_percent: 90.0,
            script_path,
            interpreter: "node".to_string(),
            log_level: LogLevel::Info,
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .filter(|value| !value.trim().is_empty())
        })
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// The lookup receives full variable names (`MERMAID_VALIDATOR_PORT`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&env_key(name)).map(|v| (env_key(name), v));

        let script_path = get("SCRIPT_PATH")
            .map(|(_, v)| PathBuf::from(v))
            .unwrap_or_else(|| PathBuf::from("mermaid-validator/server.js"));
        let mut config = Self::with_defaults(script_path);

        if let Some((key, raw)) = get("ENABLED") {
            config.enabled = parse_bool(&key, &raw)?;
        }
        if let Some((_, raw)) = get("HOST") {
            config.host = raw;
        }
        if let Some((key, raw)) = get("PORT") {
            config.port = parse_value(&key, &raw)?;
        }
        if let Some((key, raw)) = get("STARTUP_TIMEOUT") {
            config.startup_timeout = parse_secs(&key, &raw)?;
        }
        if let Some((key, raw)) = get("TIMEOUT") {
            config.request_timeout = parse_secs(&key, &raw)?;
        }
        if let Some((key, raw)) = get("SHUTDOWN_TIMEOUT") {
            config.shutdown_timeout = parse_secs(&key, &raw)?;
        }
        if let Some((key, raw)) = get("HEALTH_CHECK_TIMEOUT") {
            config.health_check_timeout = parse_secs(&key, &raw)?;
        }
        if let Some((key, raw)) = get("MAX_RETRIES") {
            config.max_retries = parse_value(&key, &raw)?;
        }
        if let Some((key, raw)) = get("RETRY_DELAY") {
            config.retry_delay = parse_secs(&key, &raw)?;
        }
        if let Some((key, raw)) = get("HEALTH_CHECK_INTERVAL") {
            config.health_check_interval = parse_secs(&key, &raw)?;
        }
        if let Some((key, raw)) = get("MAX_CONSECUTIVE_FAILURES") {
            config.max_consecutive_failures = parse_value(&key, &raw)?;
        }
        if let Some((key, raw)) = get("MAX_MEMORY_MB") {
            config.max_memory_mb = parse_value(&key, &raw)?;
        }
        if let Some((key, raw)) = get("MAX_CPU_PERCENT") {
            config.max_cpu_percent = parse_value(&key, &raw)?;
        }
        if let Some((_, raw)) = get("INTERPRETER") {
            config.interpreter = raw;
        }
        if let Some((key, raw)) = get("LOG_LEVEL") {
            config.log_level = parse_value(&key, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check positivity constraints and the script path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("STARTUP_TIMEOUT", self.startup_timeout),
            ("TIMEOUT", self.request_timeout),
            ("SHUTDOWN_TIMEOUT", self.shutdown_timeout),
            ("HEALTH_CHECK_TIMEOUT", self.health_check_timeout),
            ("HEALTH_CHECK_INTERVAL", self.health_check_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::NonPositive(env_key(name)));
            }
        }

        let counts = [
            ("PORT", u64::from(self.port)),
            ("MAX_RETRIES", u64::from(self.max_retries)),
            (
                "MAX_CONSECUTIVE_FAILURES",
                u64::from(self.max_consecutive_failures),
            ),
            ("MAX_MEMORY_MB", self.max_memory_mb),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(ConfigError::NonPositive(env_key(name)));
            }
        }

        if !(self.max_cpu_percent.is_finite() && self.max_cpu_percent > 0.0) {
            return Err(ConfigError::NonPositive(env_key("MAX_CPU_PERCENT")));
        }

        if self.interpreter.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: env_key("INTERPRETER"),
                value: self.interpreter.clone(),
                reason: "must not be empty".to_string(),
            });
        }

        if !self.script_path.exists() {
            return Err(ConfigError::ScriptNotFound(
                self.script_path.display().to_string(),
            ));
        }

        Ok(())
    }

    /// Base URL of the worker (`http://{host}:{port}`)
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected true/false".to_string(),
        }),
    }
}

/// Durations are given in (possibly fractional) seconds.
fn parse_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_value(key, raw)?;
    if secs < 0.0 {
        return Err(ConfigError::NonPositive(key.to_string()));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Loads [`ValidatorConfig`] once and caches it
///
/// The loader is an ordinary value owned by the application entry point, not
/// a global. `reset()` drops the cached value so the next `load()` re-reads
/// the environment; tests use it to avoid leaking settings between cases.
pub struct ConfigLoader {
    lookup: Lookup,
    cached: Mutex<Option<Arc<ValidatorConfig>>>,
}

impl ConfigLoader {
    /// Loader reading the process environment.
    pub fn from_env() -> Self {
        Self::with_lookup(|key| {
            std::env::var(key)
                .ok()
                .filter(|value| !value.trim().is_empty())
        })
    }

    /// Loader reading from a custom lookup.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
            cached: Mutex::new(None),
        }
    }

    /// Return the cached configuration, loading it on first access.
    pub fn load(&self) -> Result<Arc<ValidatorConfig>, ConfigError> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(config) = cached.as_ref() {
            return Ok(config.clone());
        }
        let config = Arc::new(ValidatorConfig::from_lookup(&self.lookup)?);
        tracing::debug!(
            enabled = config.enabled,
            base_url = %config.base_url(),
            script = %config.script_path.display(),
            "Validator configuration loaded"
        );
        *cached = Some(config.clone());
        Ok(config)
    }

    /// Drop the cached configuration.
    pub fn reset(&self) {
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
