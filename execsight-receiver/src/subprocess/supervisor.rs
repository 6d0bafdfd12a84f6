//! The restart loop.
//!
//! ```text
//! Stopped ──> Starting ──> Running ──> Exited ──> Starting ...
//!                │                        │
//!                └──── shutdown ──────────┴──> Stopped
//! ```
//!
//! The loop owns the child process and its crash history. Everything that
//! goes wrong with the child is handled here; nothing is returned to the
//! caller except through the optional event channel and the status watch.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::shutdown;
use crate::subprocess::backoff::{DelayEstimate, Health, RestartPolicy};
use crate::subprocess::command::resolve;
use crate::subprocess::process::{ProcessRunner, RunResult};
use crate::subprocess::SubprocessConfig;

/// Lifecycle state of the supervised process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    #[default]
    Stopped,
    Starting,
    Running,
    Exited,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Stopped => write!(f, "stopped"),
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Exited => write!(f, "exited"),
        }
    }
}

/// Read-only snapshot of the supervisor, published on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub state: SupervisorState,
    /// Current crash count.
    pub crash_count: u32,
    /// Number of exits so far.
    pub restarts: u64,
    /// Last computed restart delay in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delay_ms: Option<u64>,
    /// Pid of the running child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Notable supervisor decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A child was started.
    Launched { pid: Option<u32>, port: u16 },
    /// Resolving or launching the command failed.
    LaunchFailed { error: String },
    /// The child ended.
    Exited {
        elapsed: Duration,
        success: bool,
        health: Health,
    },
    /// The loop is about to wait before restarting.
    Backoff { crash_count: u32, delay: Duration },
    /// The loop has terminated.
    Stopped,
}

/// Crash history, private to the loop.
#[derive(Debug, Default)]
struct ProcessRunState {
    crash_count: u32,
    last_start_time: Option<Instant>,
    is_running: bool,
}

/// Keeps one exporter process alive until shutdown.
pub struct Supervisor {
    name: String,
    config: SubprocessConfig,
    port: u16,
    policy: RestartPolicy,
    runner: ProcessRunner,
    status: watch::Sender<ProcessStatus>,
    events: Option<mpsc::UnboundedSender<SupervisorEvent>>,
}

impl Supervisor {
    /// Create a supervisor for `config`, launching on the already assigned `port`.
    pub fn new(
        config: SubprocessConfig,
        port: u16,
        policy: RestartPolicy,
        termination_grace: Duration,
    ) -> Self {
        let name = config.custom_name.clone();
        let (status, _) = watch::channel(ProcessStatus::default());

        Self {
            runner: ProcessRunner::new(&name, termination_grace),
            name,
            config,
            port,
            policy,
            status,
            events: None,
        }
    }

    /// Send [`SupervisorEvent`]s to `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Subscribe to status snapshots.
    pub fn status(&self) -> watch::Receiver<ProcessStatus> {
        self.status.subscribe()
    }

    /// Run until `shutdown` is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut state = ProcessRunState::default();

        tracing::info!(
            receiver = %self.name,
            port = self.port,
            command = %self.config.command_template,
            "Starting supervisor"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(SupervisorState::Starting);

            // Re-resolved on every start; the port itself never changes.
            let command = match resolve(&self.config, self.port) {
                Ok(command) => command,
                Err(e) => {
                    tracing::error!(receiver = %self.name, error = %e, "Cannot resolve command");
                    self.emit(SupervisorEvent::LaunchFailed {
                        error: e.to_string(),
                    });
                    // never ran, so the crash count is left alone
                    if !self.wait(self.policy.initial_delay, state.crash_count, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let result = match self.runner.spawn(&command) {
                Ok(process) => {
                    let pid = process.id();
                    state.is_running = true;
                    state.last_start_time = Some(Instant::now());

                    self.status.send_modify(|status| {
                        status.state = SupervisorState::Running;
                        status.pid = pid;
                    });
                    tracing::info!(receiver = %self.name, pid = ?pid, port = self.port, "Subprocess started");
                    self.emit(SupervisorEvent::Launched {
                        pid,
                        port: self.port,
                    });

                    let result = process.wait(&mut shutdown).await;
                    state.is_running = false;
                    result
                }
                Err(e) => {
                    tracing::warn!(receiver = %self.name, error = %e, "Failed to launch subprocess");
                    self.emit(SupervisorEvent::LaunchFailed {
                        error: e.to_string(),
                    });
                    RunResult::launch_failure(e)
                }
            };

            if result.interrupted {
                break;
            }

            let estimate = self.policy.estimate(result.elapsed, state.crash_count);
            state.crash_count = estimate.crash_count;
            self.record_exit(&result, &estimate);

            if !self.wait(estimate.delay, state.crash_count, &mut shutdown).await {
                break;
            }
        }

        self.status.send_modify(|status| {
            status.state = SupervisorState::Stopped;
            status.pid = None;
        });
        self.emit(SupervisorEvent::Stopped);

        tracing::info!(
            receiver = %self.name,
            crash_count = state.crash_count,
            uptime_ms = state
                .last_start_time
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or_default(),
            "Supervisor stopped"
        );
    }

    fn record_exit(&self, result: &RunResult, estimate: &DelayEstimate) {
        let elapsed_ms = result.elapsed.as_millis() as u64;
        match &result.exit_error {
            Some(e) => tracing::warn!(
                receiver = %self.name,
                elapsed_ms,
                health = ?estimate.health,
                crash_count = estimate.crash_count,
                error = %e,
                "Subprocess exited"
            ),
            None => tracing::info!(
                receiver = %self.name,
                elapsed_ms,
                health = ?estimate.health,
                crash_count = estimate.crash_count,
                "Subprocess exited"
            ),
        }

        self.status.send_modify(|status| {
            status.state = SupervisorState::Exited;
            status.crash_count = estimate.crash_count;
            status.restarts += 1;
            status.pid = None;
        });

        self.emit(SupervisorEvent::Exited {
            elapsed: result.elapsed,
            success: result.is_success(),
            health: estimate.health,
        });
    }

    /// Sleep out a restart delay. Returns `false` on shutdown.
    async fn wait(
        &self,
        delay: Duration,
        crash_count: u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        tracing::info!(
            receiver = %self.name,
            delay_ms = delay.as_millis() as u64,
            crash_count,
            "Restarting subprocess after delay"
        );
        self.status
            .send_modify(|status| status.last_delay_ms = Some(delay.as_millis() as u64));
        self.emit(SupervisorEvent::Backoff { crash_count, delay });

        shutdown::sleep(delay, shutdown).await
    }

    fn set_state(&self, state: SupervisorState) {
        self.status.send_modify(|status| status.state = state);
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Some(events) = &self.events {
            // observers going away is not our problem
            let _ = events.send(event);
        }
    }
}
