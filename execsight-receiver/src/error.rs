//! Error types for the receiver.

use thiserror::Error;

/// Result type alias using [`ReceiverError`].
pub type Result<T> = std::result::Result<T, ReceiverError>;

/// Errors that can occur while running an exec receiver.
///
/// Only [`ReceiverError::Config`] and [`ReceiverError::MalformedCommand`]
/// escape [`ExecReceiver::start`](crate::ExecReceiver::start); everything
/// else is contained in the supervisor or scrape loops and logged.
#[derive(Error, Debug)]
pub enum ReceiverError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The command template could not be split into an argument vector.
    #[error("Malformed command '{command}': {reason}")]
    MalformedCommand { command: String, reason: String },

    /// The subprocess could not be launched.
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The subprocess exited unsuccessfully.
    #[error("Process exited with {0}")]
    Exit(std::process::ExitStatus),

    /// A scrape attempt failed.
    #[error("Scrape of {target} failed: {message}")]
    Scrape { target: String, message: String },

    /// Nothing is listening on the scrape target.
    #[error("Target {target} unreachable: {message}")]
    Unreachable { target: String, message: String },

    /// Publishing to the metrics intake failed.
    #[error("Failed to publish to {key}: {message}")]
    Publish { key: String, message: String },

    /// Port allocation failed.
    #[error("Port allocation failed: {0}")]
    Port(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReceiverError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a malformed command error.
    pub fn malformed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedCommand {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create a scrape error.
    pub fn scrape(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Scrape {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error means the receiver must refuse to start.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::MalformedCommand { .. })
    }
}

impl From<execsight_common::Error> for ReceiverError {
    fn from(err: execsight_common::Error) -> Self {
        match err {
            execsight_common::Error::Config(msg) => Self::Config(msg),
            other => Self::Serialization(other.to_string()),
        }
    }
}
