use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use execsight_common::{Format, LoggingConfig, ZenohConfig};

use crate::error::{ReceiverError, Result};
use crate::subprocess::{RestartPolicy, SubprocessConfig, tokenize};

/// Receiver type name; custom names are appended after a slash.
pub const RECEIVER_TYPE: &str = "prometheus_exec";

/// Root configuration for the receiver binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecBridgeConfig {
    /// Zenoh connection settings.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Serialization format for published scrapes.
    #[serde(default)]
    pub serialization: Format,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Exec receiver settings.
    pub exec: ExecConfig,
}

/// Settings shared by all exec receivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Key expression prefix (default: "execsight").
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Subprocesses to run and scrape.
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
}

fn default_key_prefix() -> String {
    execsight_common::KEY_PREFIX.to_string()
}

/// Configuration for a single supervised exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Receiver name, `prometheus_exec` or `prometheus_exec/<custom name>`.
    #[serde(default = "default_name")]
    pub name: String,

    /// Command line to run. `{{port}}` is replaced by the assigned port.
    #[serde(default)]
    pub exec: String,

    /// Environment passed to the subprocess. Nothing else is inherited.
    #[serde(default)]
    pub env: Vec<EnvVar>,

    /// Port the exporter listens on; 0 picks a free port at start.
    #[serde(default)]
    pub port: u16,

    /// Time between scrapes in seconds.
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval_secs: u64,

    /// Scrape request timeout in seconds.
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_secs: u64,

    /// HTTP path of the metrics endpoint.
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Restart behavior of the subprocess.
    #[serde(default)]
    pub restart: RestartConfig,
}

fn default_name() -> String {
    RECEIVER_TYPE.to_string()
}

fn default_scrape_interval() -> u64 {
    60
}

fn default_scrape_timeout() -> u64 {
    10
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// An environment variable for the subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Restart tuning for a subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartConfig {
    /// A run at least this long counts as healthy.
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold_secs: u64,

    /// Fast crashes tolerated before the delay starts doubling.
    #[serde(default = "default_healthy_crash_count")]
    pub healthy_crash_count: u32,

    /// Minimal delay between restarts in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for the restart delay in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// How long a process gets to exit after SIGTERM before it is killed.
    #[serde(default = "default_termination_grace")]
    pub termination_grace_ms: u64,
}

fn default_healthy_threshold() -> u64 {
    30 * 60
}

fn default_healthy_crash_count() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    300
}

fn default_termination_grace() -> u64 {
    5000
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            healthy_threshold_secs: default_healthy_threshold(),
            healthy_crash_count: default_healthy_crash_count(),
            initial_delay_ms: default_initial_delay(),
            max_delay_secs: default_max_delay(),
            termination_grace_ms: default_termination_grace(),
        }
    }
}

impl RestartConfig {
    /// Build the restart policy used by the supervisor.
    pub fn policy(&self) -> RestartPolicy {
        RestartPolicy {
            healthy_threshold: Duration::from_secs(self.healthy_threshold_secs),
            healthy_crash_count: self.healthy_crash_count,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }
}

impl ReceiverConfig {
    /// Create a config for `exec` with every other field defaulted.
    pub fn new(name: impl Into<String>, exec: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exec: exec.into(),
            env: Vec::new(),
            port: 0,
            scrape_interval_secs: default_scrape_interval(),
            scrape_timeout_secs: default_scrape_timeout(),
            metrics_path: default_metrics_path(),
            restart: RestartConfig::default(),
        }
    }

    /// Scrape job name derived from the receiver name.
    ///
    /// `prometheus_exec/mysqld` yields `mysqld`; a bare or slash-terminated
    /// type name yields the type itself.
    pub fn job_name(&self) -> String {
        match self.name.split_once('/') {
            Some((_, custom)) if !custom.is_empty() => custom.to_string(),
            Some((kind, _)) => kind.to_string(),
            None => self.name.clone(),
        }
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    /// The subprocess half of this config.
    pub fn subprocess(&self) -> SubprocessConfig {
        SubprocessConfig {
            command_template: self.exec.clone(),
            environment: self.env.clone(),
            custom_name: self.job_name(),
            port: self.port,
        }
    }

    /// Check the config before anything is started.
    pub fn validate(&self) -> Result<()> {
        if self.exec.trim().is_empty() {
            return Err(ReceiverError::config(format!(
                "Receiver '{}' has no exec command",
                self.name
            )));
        }

        if execsight_common::sanitize_job(&self.job_name()).is_empty() {
            return Err(ReceiverError::config(format!(
                "Receiver name '{}' does not yield a job name",
                self.name
            )));
        }

        // A template that cannot be split will never launch.
        tokenize(&self.exec)?;

        if let Some(index) = self.env.iter().position(|var| var.name.is_empty()) {
            return Err(ReceiverError::config(format!(
                "Receiver '{}' has an environment entry without a name (index {})",
                self.name, index
            )));
        }

        if self.scrape_interval_secs == 0 {
            return Err(ReceiverError::config(format!(
                "Receiver '{}' has a zero scrape interval",
                self.name
            )));
        }

        if self.scrape_timeout_secs == 0 || self.scrape_timeout_secs > self.scrape_interval_secs {
            return Err(ReceiverError::config(format!(
                "Receiver '{}': scrape timeout must be between 1 and {} seconds",
                self.name, self.scrape_interval_secs
            )));
        }

        if !self.metrics_path.starts_with('/') {
            return Err(ReceiverError::config(format!(
                "Receiver '{}': metrics path '{}' must start with '/'",
                self.name, self.metrics_path
            )));
        }

        let restart = &self.restart;
        if restart.initial_delay_ms == 0 {
            return Err(ReceiverError::config(format!(
                "Receiver '{}': initial restart delay must be positive",
                self.name
            )));
        }
        if restart.policy().max_delay < restart.policy().initial_delay {
            return Err(ReceiverError::config(format!(
                "Receiver '{}': max restart delay is shorter than the initial delay",
                self.name
            )));
        }

        Ok(())
    }
}

impl ExecBridgeConfig {
    /// Load and validate configuration from a JSON5 file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ReceiverError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: Self = execsight_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = execsight_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.exec.receivers.is_empty() {
            return Err(ReceiverError::config("At least one receiver is required"));
        }

        let mut seen = HashSet::new();
        for receiver in &self.exec.receivers {
            if !seen.insert(receiver.name.as_str()) {
                return Err(ReceiverError::config(format!(
                    "Duplicate receiver name '{}'",
                    receiver.name
                )));
            }
            receiver.validate()?;
        }

        Ok(())
    }
}
