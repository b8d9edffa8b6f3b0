//! Worker process spawning and termination
//!
//! The child is owned by a waiter task. The rest of the supervisor talks to it
//! through a watch channel (exit status) and a oneshot (forced kill), so no
//! other component ever touches the `Child` handle.

use mermaid_validator_common::config::ValidatorConfig;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::events::{LifecycleEvent, LifecycleEvents};

/// How the worker process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    status: Option<ExitStatus>,
}

impl WorkerExit {
    /// Exit code, if the process exited normally
    pub fn code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}", status),
            None => f.write_str("unknown exit status"),
        }
    }
}

/// Result of a termination request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited; no signal was sent
    AlreadyExited,
    /// The process exited within the grace period
    Graceful,
    /// The process had to be force-killed
    Killed,
    /// The process did not confirm its exit even after the forced kill
    Unconfirmed,
}

/// Handle to a running worker process
pub(crate) struct WorkerProcess {
    pid: u32,
    exit_rx: watch::Receiver<Option<WorkerExit>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl WorkerProcess {
    /// Spawn `interpreter script_path` with the worker environment.
    ///
    /// `on_exit` runs on the waiter task once the child has been reaped.
    pub(crate) fn spawn<F>(config: &ValidatorConfig, on_exit: F) -> std::io::Result<Self>
    where
        F: FnOnce(u32, WorkerExit) + Send + 'static,
    {
        let mut command = Command::new(&config.interpreter);
        command
            .arg(&config.script_path)
            .env("HOST", &config.host)
            .env("PORT", config.port.to_string())
            .env("LOG_LEVEL", config.log_level.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| std::io::Error::other("worker exited before reporting a pid"))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, pid, OutputStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, pid, OutputStream::Stderr));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // Fires on an explicit kill and when the handle is dropped.
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(pid, error = %e, "Failed to kill worker");
                    }
                    child.wait().await
                }
            };

            let exit = WorkerExit {
                status: match status {
                    Ok(status) => Some(status),
                    Err(e) => {
                        error!(pid, error = %e, "Failed to wait for worker");
                        None
                    }
                },
            };
            debug!(pid, exit = %exit, "Worker process reaped");
            let _ = exit_tx.send(Some(exit.clone()));
            on_exit(pid, exit);
        });

        info!(
            pid,
            interpreter = %config.interpreter,
            script = %config.script_path.display(),
            "Worker process spawned"
        );

        Ok(Self {
            pid,
            exit_rx,
            kill_tx: Some(kill_tx),
        })
    }

    /// Process id
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// True once the child has been reaped.
    pub(crate) fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Future resolving when the child exits; independent of `self`'s lifetime.
    pub(crate) fn exited(&self) -> impl std::future::Future<Output = WorkerExit> + Send + 'static {
        let mut rx = self.exit_rx.clone();
        async move {
            match rx.wait_for(|exit| exit.is_some()).await {
                Ok(exit) => exit.clone().unwrap_or(WorkerExit { status: None }),
                // Waiter task is gone, so is the child.
                Err(_) => WorkerExit { status: None },
            }
        }
    }

    /// Force-kill without a grace period and wait (bounded) for the exit.
    pub(crate) async fn kill(&mut self, events: &LifecycleEvents, wait: Duration) -> Termination {
        if self.has_exited() {
            return Termination::AlreadyExited;
        }
        events.publish(LifecycleEvent::SignalSent {
            pid: self.pid,
            signal: "SIGKILL".to_string(),
        });
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        match tokio::time::timeout(wait, self.exited()).await {
            Ok(_) => Termination::Killed,
            Err(_) => {
                error!(pid = self.pid, "Worker did not exit after forced kill");
                Termination::Unconfirmed
            }
        }
    }

    /// Graceful termination: SIGTERM, wait up to `grace`, then force-kill.
    pub(crate) async fn terminate(&mut self, events: &LifecycleEvents, grace: Duration) -> Termination {
        if self.has_exited() {
            debug!(pid = self.pid, "Worker already exited, no signal sent");
            return Termination::AlreadyExited;
        }

        if !send_terminate(self.pid, events) {
            return self.kill(events, grace).await;
        }

        match tokio::time::timeout(grace, self.exited()).await {
            Ok(exit) => {
                info!(pid = self.pid, exit = %exit, "Worker stopped gracefully");
                Termination::Graceful
            }
            Err(_) => {
                warn!(
                    pid = self.pid,
                    grace_ms = grace.as_millis() as u64,
                    "Worker did not stop gracefully, force killing"
                );
                self.kill(events, grace).await
            }
        }
    }
}

/// Send SIGTERM. Returns false when graceful termination is not possible.
#[cfg(unix)]
fn send_terminate(pid: u32, events: &LifecycleEvents) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => {
            debug!(pid, "Sent SIGTERM to worker");
            events.publish(LifecycleEvent::SignalSent {
                pid,
                signal: "SIGTERM".to_string(),
            });
            true
        }
        Err(e) => {
            warn!(pid, error = %e, "Failed to send SIGTERM to worker");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32, _events: &LifecycleEvents) -> bool {
    false
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Forward worker output into tracing, one event per line.
async fn forward_output<R>(reader: R, pid: u32, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match stream {
                OutputStream::Stdout => info!(target: "mermaid_worker", pid, "{}", line),
                OutputStream::Stderr => warn!(target: "mermaid_worker", pid, "{}", line),
            },
            Ok(None) => break,
            Err(e) => {
                debug!(pid, error = %e, "Worker output stream closed");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;

    fn shell_config(script_body: &str) -> (ValidatorConfig, NamedTempFile) {
        let mut script = NamedTempFile::new().unwrap();
        writeln!(script, "{}", script_body).unwrap();
        let mut config = ValidatorConfig::new(script.path()).unwrap();
        config.interpreter = "sh".to_string();
        (config, script)
    }

    #[tokio::test]
    async fn spawn_reports_exit_through_callback() {
        let (config, _script) = shell_config("exit 3");
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();

        let process = WorkerProcess::spawn(&config, move |pid, exit| {
            *sink.lock().unwrap() = Some((pid, exit.code()));
        })
        .unwrap();
        let pid = process.pid();

        let exit = tokio::time::timeout(Duration::from_secs(5), process.exited())
            .await
            .expect("worker did not exit");
        assert_eq!(exit.code(), Some(3));
        assert!(process.has_exited());

        // The callback runs right after the watch update.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), Some((pid, Some(3))));
    }

    #[tokio::test]
    async fn terminate_stops_cooperative_process() {
        let (config, _script) = shell_config("exec sleep 30");
        let events = LifecycleEvents::new();
        let mut rx = events.subscribe();
        let mut process = WorkerProcess::spawn(&config, |_, _| {}).unwrap();
        let pid = process.pid();

        let outcome = process.terminate(&events, Duration::from_secs(5)).await;
        assert_eq!(outcome, Termination::Graceful);
        assert_eq!(
            rx.recv().await.unwrap(),
            LifecycleEvent::SignalSent {
                pid,
                signal: "SIGTERM".to_string()
            }
        );
    }

    #[tokio::test]
    async fn terminate_escalates_to_kill() {
        let (config, _script) = shell_config("trap '' TERM\nwhile true; do sleep 1; done");
        let events = LifecycleEvents::new();
        let mut rx = events.subscribe();
        let mut process = WorkerProcess::spawn(&config, |_, _| {}).unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcome = process.terminate(&events, Duration::from_millis(300)).await;
        assert_eq!(outcome, Termination::Killed);

        let mut signals = Vec::new();
        while let Ok(LifecycleEvent::SignalSent { signal, .. }) = rx.try_recv() {
            signals.push(signal);
        }
        assert_eq!(signals, vec!["SIGTERM".to_string(), "SIGKILL".to_string()]);
    }

    #[tokio::test]
    async fn terminate_after_exit_sends_nothing() {
        let (config, _script) = shell_config("exit 0");
        let events = LifecycleEvents::new();
        let mut rx = events.subscribe();
        let mut process = WorkerProcess::spawn(&config, |_, _| {}).unwrap();
        process.exited().await;

        let outcome = process.terminate(&events, Duration::from_secs(1)).await;
        assert_eq!(outcome, Termination::AlreadyExited);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn spawn_fails_for_missing_interpreter() {
        let (mut config, _script) = shell_config("exit 0");
        config.interpreter = "/nonexistent/interpreter".to_string();
        assert!(WorkerProcess::spawn(&config, |_, _| {}).is_err());
    }
}
