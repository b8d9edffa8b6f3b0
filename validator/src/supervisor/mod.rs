//! Workerプロセススーパーバイザー
//!
//! 子プロセスのライフサイクル（起動・Ready確認・停止・異常終了検知・再起動）を
//! 一元管理する。状態遷移は単一の非同期ロックで直列化され、ヘルスモニターと
//! バリデーションクライアントはこの型を通じてのみ状態を観測・要求する。

mod gate;
mod process;

pub use gate::{RequestGate, RequestTicket};
pub use process::{Termination, WorkerExit};

use mermaid_validator_common::config::ValidatorConfig;
use mermaid_validator_common::error::{ValidatorError, ValidatorResult};
use mermaid_validator_common::types::{HealthSample, WorkerState, WorkerStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::events::{LifecycleEvent, LifecycleEvents};
use crate::health::probe::HealthProbe;
use process::WorkerProcess;

/// Readiness polling period during startup
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound of the restart backoff
const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(30);

/// Owner of the worker process
///
/// Cloning is cheap; all clones share the same worker.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<ValidatorConfig>,
    probe: HealthProbe,
    events: LifecycleEvents,
    gate: RequestGate,
    /// Single-writer lock for start/stop/restart; also guards the process handle.
    transition: tokio::sync::Mutex<Option<WorkerProcess>>,
    state: Mutex<StateCell>,
    restart_generation: AtomicU64,
    last_restart: Mutex<Option<ValidatorResult<()>>>,
}

#[derive(Debug)]
struct StateCell {
    status: WorkerStatus,
    pid: Option<u32>,
    /// Identifies the current child so late exit notifications are ignored.
    spawn_id: u64,
    consecutive_failures: u32,
    restart_attempts: u32,
    restarts_exhausted: bool,
    /// Set by start/restart, cleared by stop.
    wants_running: bool,
    last_sample: Option<HealthSample>,
}

impl Supervisor {
    /// Create a supervisor for the configured worker. Nothing is spawned yet.
    pub fn new(config: Arc<ValidatorConfig>) -> ValidatorResult<Self> {
        let probe = HealthProbe::new(&config)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                probe,
                events: LifecycleEvents::new(),
                gate: RequestGate::default(),
                transition: tokio::sync::Mutex::new(None),
                state: Mutex::new(StateCell {
                    status: WorkerStatus::Stopped,
                    pid: None,
                    spawn_id: 0,
                    consecutive_failures: 0,
                    restart_attempts: 0,
                    restarts_exhausted: false,
                    wants_running: false,
                    last_sample: None,
                }),
                restart_generation: AtomicU64::new(0),
                last_restart: Mutex::new(None),
            }),
        })
    }

    /// Shared configuration
    pub fn config(&self) -> &Arc<ValidatorConfig> {
        &self.inner.config
    }

    /// Current lifecycle status
    pub fn status(&self) -> WorkerStatus {
        self.inner.state().status
    }

    /// Point-in-time view of the worker state
    pub fn snapshot(&self) -> WorkerState {
        let state = self.inner.state();
        WorkerState {
            status: state.status,
            pid: state.pid,
            consecutive_failures: state.consecutive_failures,
            restart_attempts: state.restart_attempts,
            restarts_exhausted: state.restarts_exhausted,
            last_sample: state.last_sample.clone(),
        }
    }

    /// Child process id while running
    pub fn pid(&self) -> Option<u32> {
        self.inner.state().pid
    }

    /// True while the worker is supposed to be running.
    ///
    /// False before the first start, after `stop()`, and after a restart cycle
    /// gave up.
    pub fn wants_running(&self) -> bool {
        let state = self.inner.state();
        state.wants_running && !state.restarts_exhausted
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Number of validation calls currently in flight
    pub fn in_flight(&self) -> usize {
        self.inner.gate.in_flight()
    }

    /// Register a validation call; `None` unless the worker is `Ready`.
    ///
    /// The ticket is taken before the status check so a restart that begins
    /// right after the check still aborts the call.
    pub fn begin_request(&self) -> Option<RequestTicket> {
        let ticket = self.inner.gate.begin();
        if self.status() == WorkerStatus::Ready {
            Some(ticket)
        } else {
            None
        }
    }

    /// Start the worker and wait until it answers `/health`.
    ///
    /// No-op when already `Ready`. Clears a previous restart exhaustion.
    pub async fn start(&self) -> ValidatorResult<()> {
        let mut worker = self.inner.transition.lock().await;
        self.inner.update(|state| {
            state.wants_running = true;
            state.restarts_exhausted = false;
            state.restart_attempts = 0;
        });

        let alive = worker.as_ref().is_some_and(|p| !p.has_exited());
        if alive && self.status() == WorkerStatus::Ready {
            debug!("Worker already running");
            return Ok(());
        }

        // A degraded or crashed worker is replaced.
        if let Some(mut stale) = worker.take() {
            self.inner.set_status(WorkerStatus::Starting);
            self.inner.gate.abort_in_flight();
            stale
                .terminate(&self.inner.events, self.inner.config.shutdown_timeout)
                .await;
        }

        self.start_locked(&mut worker).await
    }

    /// Stop the worker: SIGTERM, wait up to `shutdown_timeout`, then kill.
    ///
    /// Idempotent; stopping a stopped supervisor sends no signal.
    pub async fn stop(&self) -> ValidatorResult<()> {
        let mut worker = self.inner.transition.lock().await;
        self.inner.update(|state| state.wants_running = false);
        self.stop_locked(&mut worker).await;
        Ok(())
    }

    /// Stop and start the worker with bounded, backed-off attempts.
    ///
    /// Concurrent calls collapse into one restart; callers that queued behind
    /// it receive its outcome. Only restarts coalesce: a call queued behind a
    /// `stop()` or `start()` still runs its own restart.
    pub async fn restart(&self) -> ValidatorResult<()> {
        match self.restart_with(false).await {
            Some(outcome) => outcome,
            None => Ok(()),
        }
    }

    /// Like `restart()`, but only while the worker is still wanted.
    ///
    /// Returns `None` without touching the worker when a `stop()` (or an
    /// exhausted restart cycle) got the transition lock first.
    pub async fn restart_if_wanted(&self) -> Option<ValidatorResult<()>> {
        self.restart_with(true).await
    }

    async fn restart_with(&self, only_if_wanted: bool) -> Option<ValidatorResult<()>> {
        let observed = self.inner.restart_generation.load(Ordering::SeqCst);
        let mut worker = self.inner.transition.lock().await;

        if only_if_wanted && !self.wants_running() {
            info!(status = %self.status(), "Worker no longer wanted; restart skipped");
            return None;
        }

        if self.inner.restart_generation.load(Ordering::SeqCst) != observed {
            debug!("Restart already completed by a concurrent caller");
            return Some(
                self.inner
                    .last_restart
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone()
                    .unwrap_or(Ok(())),
            );
        }

        let outcome = self.restart_locked(&mut worker).await;
        *self
            .inner
            .last_restart
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(outcome.clone());
        self.inner.restart_generation.fetch_add(1, Ordering::SeqCst);
        Some(outcome)
    }

    /// Move `Ready` to `Degraded` after sustained probe failures.
    pub fn mark_degraded(&self) {
        let changed = self.inner.update(|state| {
            if state.status == WorkerStatus::Ready {
                state.status = WorkerStatus::Degraded;
                true
            } else {
                false
            }
        });
        if changed {
            warn!("Worker marked as degraded");
            self.inner.events.publish(LifecycleEvent::StatusChanged {
                old: WorkerStatus::Ready,
                new: WorkerStatus::Degraded,
            });
        }
    }

    /// Record a healthy probe; resets the consecutive-failure counter.
    pub fn record_probe_success(&self, sample: HealthSample) {
        self.inner.update(|state| {
            state.consecutive_failures = 0;
            state.last_sample = Some(sample);
        });
    }

    /// Record a failed probe; returns the new consecutive-failure count.
    pub fn record_probe_failure(&self, sample: HealthSample, reason: &str) -> u32 {
        let failures = self.inner.update(|state| {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.last_sample = Some(sample);
            state.consecutive_failures
        });
        self.inner.events.publish(LifecycleEvent::ProbeFailed {
            consecutive_failures: failures,
            reason: reason.to_string(),
        });
        failures
    }

    /// Reset the consecutive-failure counter.
    pub fn reset_failures(&self) {
        self.inner.update(|state| state.consecutive_failures = 0);
    }

    #[cfg(test)]
    pub(crate) fn force_status(&self, status: WorkerStatus) {
        self.inner.set_status(status);
    }

    async fn start_locked(&self, worker: &mut Option<WorkerProcess>) -> ValidatorResult<()> {
        let config = &self.inner.config;
        self.inner.set_status(WorkerStatus::Starting);
        let spawn_id = self.inner.update(|state| {
            state.consecutive_failures = 0;
            state.spawn_id += 1;
            state.spawn_id
        });

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let spawned = WorkerProcess::spawn(config, move |pid, exit| {
            if let Some(inner) = weak.upgrade() {
                inner.on_worker_exit(spawn_id, pid, exit);
            }
        });

        let mut process = match spawned {
            Ok(process) => process,
            Err(e) => {
                self.inner.set_status(WorkerStatus::Stopped);
                error!(
                    interpreter = %config.interpreter,
                    script = %config.script_path.display(),
                    error = %e,
                    "Failed to spawn worker"
                );
                return Err(ValidatorError::startup(format!(
                    "failed to spawn '{} {}': {}",
                    config.interpreter,
                    config.script_path.display(),
                    e
                )));
            }
        };

        let pid = process.pid();
        self.inner.update(|state| state.pid = Some(pid));
        self.inner.events.publish(LifecycleEvent::Spawned { pid });

        let ready =
            tokio::time::timeout(config.startup_timeout, self.wait_until_ready(&process)).await;
        match ready {
            Ok(Ok(())) => {
                *worker = Some(process);
                self.inner.set_status(WorkerStatus::Ready);
                info!(pid, url = %config.base_url(), "Worker is ready");
                Ok(())
            }
            Ok(Err(exit)) => {
                self.inner.update(|state| state.pid = None);
                self.inner.set_status(WorkerStatus::Stopped);
                error!(pid, exit = %exit, "Worker exited during startup");
                Err(ValidatorError::startup(format!(
                    "worker exited during startup ({})",
                    exit
                )))
            }
            Err(_) => {
                process
                    .kill(&self.inner.events, config.shutdown_timeout)
                    .await;
                self.inner.update(|state| state.pid = None);
                self.inner.set_status(WorkerStatus::Stopped);
                error!(
                    pid,
                    timeout_ms = config.startup_timeout.as_millis() as u64,
                    "Worker did not become ready in time"
                );
                Err(ValidatorError::SubprocessStartup {
                    reason: format!(
                        "worker not ready within {}ms",
                        config.startup_timeout.as_millis()
                    ),
                    timed_out: true,
                })
            }
        }
    }

    /// Poll `/health` until it succeeds or the child exits.
    async fn wait_until_ready(&self, process: &WorkerProcess) -> Result<(), WorkerExit> {
        let exited = process.exited();
        tokio::pin!(exited);

        loop {
            tokio::select! {
                exit = &mut exited => return Err(exit),
                probe = self.inner.probe.check() => match probe {
                    Ok(_) => return Ok(()),
                    Err(e) => debug!(error = %e, "Worker not ready yet"),
                },
            }
            tokio::select! {
                exit = &mut exited => return Err(exit),
                _ = tokio::time::sleep(STARTUP_POLL_INTERVAL) => {}
            }
        }
    }

    async fn stop_locked(&self, worker: &mut Option<WorkerProcess>) {
        let mut process = worker.take();
        let alive = process.as_ref().is_some_and(|p| !p.has_exited());
        if !alive && self.status() == WorkerStatus::Stopped {
            debug!("Worker already stopped");
            return;
        }

        self.inner.set_status(WorkerStatus::ShuttingDown);
        self.inner.gate.abort_in_flight();

        if let Some(process) = process.as_mut() {
            let outcome = process
                .terminate(&self.inner.events, self.inner.config.shutdown_timeout)
                .await;
            debug!(pid = process.pid(), outcome = ?outcome, "Worker terminated");
        }

        self.inner.update(|state| state.pid = None);
        self.inner.set_status(WorkerStatus::Stopped);
        info!("Worker stopped");
    }

    async fn restart_locked(&self, worker: &mut Option<WorkerProcess>) -> ValidatorResult<()> {
        let config = self.inner.config.clone();
        let max_attempts = config.max_retries.max(1);

        info!(max_attempts, "Restarting worker");
        self.inner.events.publish(LifecycleEvent::RestartStarted);
        self.inner.update(|state| {
            state.wants_running = true;
            state.restarts_exhausted = false;
            state.restart_attempts = 0;
            state.consecutive_failures = 0;
        });
        self.inner.set_status(WorkerStatus::Restarting);
        self.inner.gate.abort_in_flight();

        if let Some(mut process) = worker.take() {
            process
                .terminate(&self.inner.events, config.shutdown_timeout)
                .await;
        }
        self.inner.update(|state| state.pid = None);

        for attempt in 1..=max_attempts {
            self.inner.update(|state| state.restart_attempts = attempt);
            match self.start_locked(worker).await {
                Ok(()) => {
                    info!(attempt, "Worker restarted");
                    self.inner.events.publish(LifecycleEvent::RestartFinished {
                        success: true,
                        attempts: attempt,
                    });
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Restart attempt failed");
                    if attempt < max_attempts {
                        self.inner.set_status(WorkerStatus::Restarting);
                        tokio::time::sleep(restart_backoff(config.retry_delay, attempt)).await;
                    }
                }
            }
        }

        self.inner.update(|state| {
            state.restarts_exhausted = true;
            state.pid = None;
        });
        self.inner.set_status(WorkerStatus::Stopped);
        self.inner.events.publish(LifecycleEvent::RestartFinished {
            success: false,
            attempts: max_attempts,
        });
        error!(
            attempts = max_attempts,
            "Worker failed to restart; validation unavailable until a manual start"
        );
        Err(ValidatorError::unavailable(format!(
            "worker failed to restart after {} attempts",
            max_attempts
        )))
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, StateCell> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update<R>(&self, f: impl FnOnce(&mut StateCell) -> R) -> R {
        f(&mut self.state())
    }

    fn set_status(&self, new: WorkerStatus) {
        let old = self.update(|state| std::mem::replace(&mut state.status, new));
        if old != new {
            debug!(old = %old, new = %new, "Worker status changed");
            self.events
                .publish(LifecycleEvent::StatusChanged { old, new });
        }
    }

    /// Called from the waiter task once the child has been reaped.
    fn on_worker_exit(&self, spawn_id: u64, pid: u32, exit: WorkerExit) {
        let in_flight = self.gate.in_flight();
        let transition = self.update(|state| {
            if state.spawn_id != spawn_id {
                return None;
            }
            match state.status {
                WorkerStatus::Ready | WorkerStatus::Degraded => {
                    let old = state.status;
                    state.status = if in_flight > 0 {
                        WorkerStatus::Degraded
                    } else {
                        WorkerStatus::Stopped
                    };
                    state.pid = None;
                    Some((old, state.status))
                }
                _ => None,
            }
        });

        self.events.publish(LifecycleEvent::Exited {
            pid,
            code: exit.code(),
            expected: transition.is_none(),
        });

        if let Some((old, new)) = transition {
            warn!(pid, exit = %exit, in_flight, status = %new, "Worker exited unexpectedly");
            self.gate.abort_in_flight();
            if old != new {
                self.events
                    .publish(LifecycleEvent::StatusChanged { old, new });
            }
        }
    }
}

/// `retry_delay × 2^(attempt-1)`, capped.
fn restart_backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RESTART_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(restart_backoff(base, 1), Duration::from_millis(500));
        assert_eq!(restart_backoff(base, 2), Duration::from_secs(1));
        assert_eq!(restart_backoff(base, 3), Duration::from_secs(2));
        assert_eq!(restart_backoff(base, 40), MAX_RESTART_BACKOFF);
        assert_eq!(restart_backoff(Duration::ZERO, 5), Duration::ZERO);
    }

    #[tokio::test]
    async fn new_supervisor_is_stopped() {
        let config = ValidatorConfig::new(env!("CARGO_MANIFEST_DIR")).unwrap();
        let supervisor = Supervisor::new(Arc::new(config)).unwrap();

        let snapshot = supervisor.snapshot();
        assert_eq!(snapshot.status, WorkerStatus::Stopped);
        assert_eq!(snapshot.pid, None);
        assert!(!supervisor.wants_running());
        assert!(supervisor.begin_request().is_none());
        assert_eq!(supervisor.in_flight(), 0);
    }

    #[tokio::test]
    async fn stop_on_fresh_supervisor_is_noop() {
        let config = ValidatorConfig::new(env!("CARGO_MANIFEST_DIR")).unwrap();
        let supervisor = Supervisor::new(Arc::new(config)).unwrap();
        let mut events = supervisor.subscribe();

        supervisor.stop().await.unwrap();

        assert_eq!(supervisor.status(), WorkerStatus::Stopped);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn conditional_restart_skips_unwanted_worker() {
        let config = ValidatorConfig::new(env!("CARGO_MANIFEST_DIR")).unwrap();
        let supervisor = Supervisor::new(Arc::new(config)).unwrap();
        let mut events = supervisor.subscribe();

        assert!(supervisor.restart_if_wanted().await.is_none());

        assert_eq!(supervisor.status(), WorkerStatus::Stopped);
        assert!(!supervisor.wants_running());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn probe_counters() {
        let config = ValidatorConfig::new(env!("CARGO_MANIFEST_DIR")).unwrap();
        let supervisor = Supervisor::new(Arc::new(config)).unwrap();
        let sample = HealthSample::unreachable(Duration::from_millis(3));

        assert_eq!(supervisor.record_probe_failure(sample.clone(), "refused"), 1);
        assert_eq!(supervisor.record_probe_failure(sample.clone(), "refused"), 2);
        assert_eq!(supervisor.snapshot().consecutive_failures, 2);

        supervisor.record_probe_success(HealthSample::reachable(Duration::from_millis(1)));
        let snapshot = supervisor.snapshot();
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.last_sample.unwrap().reachable);

        supervisor.record_probe_failure(sample, "refused");
        supervisor.reset_failures();
        assert_eq!(supervisor.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn mark_degraded_only_from_ready() {
        let config = ValidatorConfig::new(env!("CARGO_MANIFEST_DIR")).unwrap();
        let supervisor = Supervisor::new(Arc::new(config)).unwrap();

        supervisor.mark_degraded();
        assert_eq!(supervisor.status(), WorkerStatus::Stopped);
    }
}
