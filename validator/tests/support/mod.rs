//! Shared helpers for worker integration tests
//!
//! The "worker" is a shell script started through `sh`; its HTTP side is a
//! wiremock server bound to the configured host/port.

#![allow(dead_code)]

use mermaid_validator::events::LifecycleEvent;
use mermaid_validator::ValidatorConfig;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, Request, Respond, ResponseTemplate,
};

/// Write `body` into a temporary shell script
pub fn shell_script(body: &str) -> NamedTempFile {
    let mut script = NamedTempFile::new().expect("create script");
    writeln!(script, "{}", body).expect("write script");
    script
}

/// Fast-cycling configuration pointing at `server`
pub fn config_for(server: &MockServer, script: &NamedTempFile) -> ValidatorConfig {
    let address = server.address();
    let mut config = ValidatorConfig::new(script.path()).expect("script exists");
    config.interpreter = "sh".to_string();
    config.host = address.ip().to_string();
    config.port = address.port();
    config.startup_timeout = Duration::from_secs(3);
    config.request_timeout = Duration::from_secs(3);
    config.shutdown_timeout = Duration::from_secs(2);
    config.health_check_timeout = Duration::from_millis(300);
    config.health_check_interval = Duration::from_millis(100);
    config.retry_delay = Duration::from_millis(50);
    config.max_retries = 2;
    config.max_consecutive_failures = 3;
    config.max_memory_mb = 4096;
    config.max_cpu_percent = 10_000.0;
    config
}

/// `GET /health` always answers with `status`
pub async fn mount_health(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({"status": "ok"})))
        .mount(server)
        .await;
}

/// `POST /validate` always answers with `body`, after `delay`
pub async fn mount_validate(server: &MockServer, body: serde_json::Value, delay: Duration) {
    Mock::given(method("POST"))
        .and(path("/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body).set_delay(delay))
        .mount(server)
        .await;
}

/// Answers 200, except for requests numbered `failing` (0-based) which get 500.
pub struct ScriptedHealth {
    failing: std::ops::Range<usize>,
    delay: Duration,
    seen: Arc<AtomicUsize>,
}

impl ScriptedHealth {
    pub fn new(failing: std::ops::Range<usize>) -> (Self, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        (
            Self {
                failing,
                delay: Duration::ZERO,
                seen: seen.clone(),
            },
            seen,
        )
    }

    /// Failing responses are sent only after `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Respond for ScriptedHealth {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.seen.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&n) {
            ResponseTemplate::new(500).set_delay(self.delay)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

/// Drain every event currently queued
pub fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
