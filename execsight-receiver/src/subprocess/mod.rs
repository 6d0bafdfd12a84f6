//! Subprocess supervision.
//!
//! - [`command`] turns a [`SubprocessConfig`] into a launchable [`ResolvedCommand`]
//! - [`backoff`] decides how long to wait before the next restart
//! - [`process`] runs one child process to completion
//! - [`supervisor`] restarts the child forever until shut down

pub mod backoff;
pub mod command;
pub mod process;
pub mod supervisor;

pub use backoff::{DelayEstimate, Health, RestartPolicy, estimate_delay};
pub use command::{PORT_PLACEHOLDER, ResolvedCommand, fill_port, resolve, tokenize};
pub use process::{ProcessRunner, RunResult, RunningProcess};
pub use supervisor::{ProcessStatus, Supervisor, SupervisorEvent, SupervisorState};

use crate::config::EnvVar;

/// Everything needed to launch the exporter process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubprocessConfig {
    /// Command line with optional `{{port}}` placeholders.
    pub command_template: String,
    /// Environment handed to the child, in order.
    pub environment: Vec<EnvVar>,
    /// Name used in logs.
    pub custom_name: String,
    /// Configured port; 0 means one is allocated at start.
    pub port: u16,
}
