//! Periodic worker health monitor
//!
//! One tick = one probe. Ticks never overlap and a restart triggered by a
//! tick finishes before the next tick starts.

use mermaid_validator_common::config::ValidatorConfig;
use mermaid_validator_common::error::ValidatorResult;
use mermaid_validator_common::types::{HealthSample, WorkerStatus};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::probe::HealthProbe;
use super::resources::ResourceSampler;
use crate::shutdown::ShutdownController;
use crate::supervisor::Supervisor;

/// Number of samples kept for `recent_samples()`
const SAMPLE_HISTORY: usize = 16;

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing probed; the worker is not meant to run or is mid-transition
    Skipped(WorkerStatus),
    /// Probe succeeded within resource limits
    Healthy,
    /// Probe failed below the restart threshold
    Unhealthy {
        /// Failures in a row so far
        consecutive_failures: u32,
    },
    /// The failure threshold was reached and a restart ran
    Restarted {
        /// Whether the worker came back `Ready`
        success: bool,
    },
}

/// ヘルスモニター
pub struct HealthMonitor {
    supervisor: Supervisor,
    config: Arc<ValidatorConfig>,
    probe: HealthProbe,
    sampler: ResourceSampler,
    samples: VecDeque<HealthSample>,
}

impl HealthMonitor {
    /// スーパーバイザーに紐づくモニターを作成
    pub fn new(supervisor: Supervisor) -> ValidatorResult<Self> {
        let config = supervisor.config().clone();
        let probe = HealthProbe::new(&config)?;
        Ok(Self {
            supervisor,
            config,
            probe,
            sampler: ResourceSampler::new(),
            samples: VecDeque::with_capacity(SAMPLE_HISTORY),
        })
    }

    /// 直近のサンプル（古い順）
    pub fn recent_samples(&self) -> Vec<HealthSample> {
        self.samples.iter().cloned().collect()
    }

    /// Run one probe cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        let status = self.supervisor.status();
        if !self.supervisor.wants_running() || status.is_transitioning() {
            debug!(status = %status, "Skipping health check");
            return TickOutcome::Skipped(status);
        }

        // 子プロセスが居ない間は、ポートに応答があっても健全とは見なさない
        let process_gone = match status {
            WorkerStatus::Stopped => true,
            WorkerStatus::Degraded => self.supervisor.pid().is_none(),
            _ => false,
        };

        let started = Instant::now();
        let (sample, failure) = if process_gone {
            (
                HealthSample::unreachable(Duration::ZERO),
                Some("worker process not running".to_string()),
            )
        } else {
            match self.probe.check().await {
                Ok(latency) => {
                    let mut sample = HealthSample::reachable(latency);
                    if let Some(usage) =
                        self.supervisor.pid().and_then(|pid| self.sampler.sample(pid))
                    {
                        sample.memory_mb = Some(usage.memory_mb);
                        sample.cpu_percent = Some(usage.cpu_percent);
                    }
                    let failure = check_limits(&self.config, &sample);
                    (sample, failure)
                }
                Err(e) => (HealthSample::unreachable(started.elapsed()), Some(e.to_string())),
            }
        };

        // A stop may have landed while the probe was out.
        if !self.supervisor.wants_running() {
            let status = self.supervisor.status();
            debug!(status = %status, "Worker stopped during health check");
            return TickOutcome::Skipped(status);
        }
        self.remember(sample.clone());

        let Some(reason) = failure else {
            self.supervisor.record_probe_success(sample);
            return TickOutcome::Healthy;
        };

        let failures = self.supervisor.record_probe_failure(sample, &reason);
        warn!(
            consecutive_failures = failures,
            threshold = self.config.max_consecutive_failures,
            reason = %reason,
            "Worker health check failed"
        );
        if failures < self.config.max_consecutive_failures {
            return TickOutcome::Unhealthy {
                consecutive_failures: failures,
            };
        }

        self.supervisor.mark_degraded();
        let result = self.supervisor.restart_if_wanted().await;
        self.supervisor.reset_failures();
        match result {
            None => TickOutcome::Skipped(self.supervisor.status()),
            Some(Ok(())) => {
                info!("Worker restarted after failed health checks");
                TickOutcome::Restarted { success: true }
            }
            Some(Err(e)) => {
                error!(error = %e, "Worker restart after failed health checks did not succeed");
                TickOutcome::Restarted { success: false }
            }
        }
    }

    /// バックグラウンドで監視を開始
    ///
    /// `shutdown` が要求されると次の起床時にループを抜ける（プローブ中は中断しない）。
    pub fn spawn(mut self, shutdown: ShutdownController) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(self.config.health_check_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_ms = self.config.health_check_interval.as_millis() as u64,
                "Worker health monitor started"
            );

            // `interval()` ticks immediately; the worker was just probed by start().
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = timer.tick() => {}
                }
                if shutdown.is_shutdown_requested() {
                    break;
                }
                let outcome = self.tick().await;
                debug!(outcome = ?outcome, "Health check tick finished");
            }

            info!("Worker health monitor stopped");
        })
    }

    fn remember(&mut self, sample: HealthSample) {
        if self.samples.len() == SAMPLE_HISTORY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }
}

/// Resource ceiling check; returns the violation, if any.
fn check_limits(config: &ValidatorConfig, sample: &HealthSample) -> Option<String> {
    if let Some(memory_mb) = sample.memory_mb {
        if memory_mb > config.max_memory_mb as f64 {
            return Some(format!(
                "memory {:.1}MB exceeds limit {}MB",
                memory_mb, config.max_memory_mb
            ));
        }
    }
    if let Some(cpu) = sample.cpu_percent {
        if cpu > config.max_cpu_percent {
            return Some(format!(
                "cpu {:.1}% exceeds limit {:.1}%",
                cpu, config.max_cpu_percent
            ));
        }
    }
    None
}
