//! Receiver status reporting.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;
use crate::publisher::ZenohIntake;
use crate::shutdown;
use crate::subprocess::{ProcessStatus, SupervisorState};

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_OFFLINE: &str = "offline";

/// Status document published to `{prefix}/{job}/@/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverStatus {
    /// Receiver name, e.g. `prometheus_exec/mysqld`.
    pub receiver: String,
    /// Scrape job name.
    pub job: String,
    /// Crate version.
    pub version: String,
    /// "running" or "offline".
    pub status: String,
    /// Port the exporter was launched on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Supervisor snapshot, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessStatus>,
}

impl ReceiverStatus {
    pub fn running(receiver: impl Into<String>, job: impl Into<String>, port: u16) -> Self {
        Self {
            receiver: receiver.into(),
            job: job.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: STATUS_RUNNING.to_string(),
            port: Some(port),
            process: None,
        }
    }

    pub fn offline(receiver: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            receiver: receiver.into(),
            job: job.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: STATUS_OFFLINE.to_string(),
            port: None,
            process: None,
        }
    }

    /// Attach a supervisor snapshot.
    pub fn with_process(mut self, process: ProcessStatus) -> Self {
        self.process = Some(process);
        self
    }

    /// Publish to `{prefix}/{job}/@/status` as JSON.
    pub async fn publish(&self, intake: &ZenohIntake) -> Result<()> {
        let key = intake.keys().status_key(&self.job);
        intake.publish_json(&key, self).await
    }
}

/// Publishes running/offline status for one receiver.
#[derive(Clone, Debug)]
pub struct StatusPublisher {
    intake: ZenohIntake,
    receiver: String,
    job: String,
}

impl StatusPublisher {
    pub fn new(intake: ZenohIntake, receiver: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            intake,
            receiver: receiver.into(),
            job: job.into(),
        }
    }

    pub async fn publish_running(&self, port: u16, process: Option<ProcessStatus>) -> Result<()> {
        let mut status = ReceiverStatus::running(&self.receiver, &self.job, port);
        if let Some(process) = process {
            status = status.with_process(process);
        }
        status.publish(&self.intake).await
    }

    pub async fn publish_offline(&self) -> Result<()> {
        ReceiverStatus::offline(&self.receiver, &self.job)
            .publish(&self.intake)
            .await
    }

    /// Republish the running status each time the supervisor launches a new
    /// child, until shutdown or until the supervisor goes away.
    pub async fn track(
        &self,
        port: u16,
        mut process: watch::Receiver<ProcessStatus>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut last_pid = None;

        loop {
            let snapshot = process.borrow_and_update().clone();
            let pid = launched_pid(&snapshot);
            if pid.is_some() && pid != last_pid {
                last_pid = pid;
                if let Err(e) = self.publish_running(port, Some(snapshot)).await {
                    tracing::warn!(receiver = %self.receiver, error = %e, "Failed to publish running status");
                }
            }

            tokio::select! {
                changed = process.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown::requested(&mut shutdown) => break,
            }
        }
    }
}

/// Pid of a child that is up, if any.
fn launched_pid(status: &ProcessStatus) -> Option<u32> {
    match status.state {
        SupervisorState::Running => status.pid,
        _ => None,
    }
}
