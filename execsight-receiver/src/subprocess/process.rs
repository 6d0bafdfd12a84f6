//! Running a single child process.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ReceiverError, Result};
use crate::shutdown;
use crate::subprocess::ResolvedCommand;

/// How long to wait for the child to be reaped after SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Outcome of one process run.
#[derive(Debug)]
pub struct RunResult {
    /// Wall-clock lifetime of the process.
    pub elapsed: Duration,
    /// Why the process ended, if it did not exit successfully.
    pub exit_error: Option<ReceiverError>,
    /// The run was cut short by a shutdown request.
    pub interrupted: bool,
}

impl RunResult {
    /// A process that could not be started at all.
    pub fn launch_failure(error: ReceiverError) -> Self {
        Self {
            elapsed: Duration::ZERO,
            exit_error: Some(error),
            interrupted: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_error.is_none()
    }
}

/// Launches child processes for one receiver.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    name: String,
    termination_grace: Duration,
}

impl ProcessRunner {
    pub fn new(name: impl Into<String>, termination_grace: Duration) -> Self {
        Self {
            name: name.into(),
            termination_grace,
        }
    }

    /// Start the process.
    ///
    /// The child sees only the environment in `command`, gets no stdin, and
    /// has its output forwarded to the log. It is killed if the returned
    /// handle is dropped.
    pub fn spawn(&self, command: &ResolvedCommand) -> Result<RunningProcess> {
        let mut builder = Command::new(command.program());
        builder
            .args(command.args())
            .env_clear()
            .envs(command.env.iter().map(|(name, value)| (name, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own group, so signals also reach whatever a wrapper script starts.
        #[cfg(unix)]
        builder.process_group(0);

        let mut child = builder.spawn().map_err(|source| ReceiverError::Launch {
            program: command.program().to_string(),
            source,
        })?;

        forward_output(&self.name, "stdout", child.stdout.take());
        forward_output(&self.name, "stderr", child.stderr.take());

        Ok(RunningProcess {
            name: self.name.clone(),
            group: child.id(),
            child,
            started: Instant::now(),
            termination_grace: self.termination_grace,
        })
    }

    /// Start the process and wait for it to end.
    pub async fn run(
        &self,
        command: &ResolvedCommand,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RunResult {
        match self.spawn(command) {
            Ok(process) => process.wait(shutdown).await,
            Err(e) => RunResult::launch_failure(e),
        }
    }
}

/// Log every line of a child stream until it closes.
fn forward_output<R>(name: &str, stream_name: &'static str, stream: Option<R>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else {
        return;
    };
    let name = name.to_string();

    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(receiver = %name, stream = stream_name, "{}", line);
        }
    });
}

/// Exclusive handle on a started child process.
///
/// The child leads its own process group. Dropping the handle kills the
/// whole group, including processes left behind after the child exited.
#[derive(Debug)]
pub struct RunningProcess {
    name: String,
    child: Child,
    /// Process group id, equal to the child's pid at spawn.
    group: Option<u32>,
    started: Instant,
    termination_grace: Duration,
}

impl RunningProcess {
    /// OS process id, while the child has not been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the child to exit, or terminate it on shutdown.
    pub async fn wait(mut self, shutdown: &mut watch::Receiver<bool>) -> RunResult {
        tokio::select! {
            status = self.child.wait() => {
                let exit_error = match status {
                    Ok(status) if status.success() => None,
                    Ok(status) => Some(ReceiverError::Exit(status)),
                    Err(e) => Some(ReceiverError::Io(e)),
                };

                RunResult {
                    elapsed: self.started.elapsed(),
                    exit_error,
                    interrupted: false,
                }
            }
            _ = shutdown::requested(shutdown) => {
                self.terminate().await;

                RunResult {
                    elapsed: self.started.elapsed(),
                    exit_error: None,
                    interrupted: true,
                }
            }
        }
    }

    /// Ask the child to exit, killing it if the grace period runs out.
    pub async fn terminate(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }

        tracing::info!(
            receiver = %self.name,
            pid = ?self.child.id(),
            grace_ms = self.termination_grace.as_millis() as u64,
            "Terminating subprocess"
        );
        self.request_exit();

        match tokio::time::timeout(self.termination_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(receiver = %self.name, %status, "Subprocess exited after termination request");
            }
            Ok(Err(e)) => {
                tracing::warn!(receiver = %self.name, error = %e, "Failed waiting for subprocess");
            }
            Err(_) => {
                tracing::warn!(receiver = %self.name, "Subprocess ignored termination request, killing");
                self.kill_group();
                if let Err(e) = self.child.start_kill() {
                    tracing::debug!(receiver = %self.name, error = %e, "Failed to kill subprocess");
                }
                if tokio::time::timeout(KILL_WAIT, self.child.wait()).await.is_err() {
                    tracing::error!(receiver = %self.name, "Subprocess still running after kill");
                }
            }
        }
    }

    #[cfg(unix)]
    fn request_exit(&mut self) {
        use nix::sys::signal::Signal;

        if let Err(e) = self.signal_group(Signal::SIGTERM) {
            tracing::debug!(receiver = %self.name, group = ?self.group, error = %e, "SIGTERM failed, killing instead");
            let _ = self.child.start_kill();
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        let _ = self.child.start_kill();
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        use nix::errno::Errno;
        use nix::sys::signal::Signal;

        match self.signal_group(Signal::SIGKILL) {
            // group already empty
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                tracing::warn!(receiver = %self.name, group = ?self.group, error = %e, "Failed to kill process group");
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> nix::Result<()> {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let group = self
            .group
            .and_then(|pid| i32::try_from(pid).ok())
            .ok_or(nix::errno::Errno::ESRCH)?;
        killpg(Pid::from_raw(group), signal)
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        self.kill_group();
    }
}
