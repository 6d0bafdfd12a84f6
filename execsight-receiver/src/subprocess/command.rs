//! Port templating and command line tokenizing.

use crate::error::{ReceiverError, Result};
use crate::subprocess::SubprocessConfig;

/// Placeholder replaced by the assigned port in commands and env values.
pub const PORT_PLACEHOLDER: &str = "{{port}}";

/// A command ready to hand to the process runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    /// Executable followed by its arguments.
    pub argv: Vec<String>,
    /// Complete child environment.
    pub env: Vec<(String, String)>,
}

impl ResolvedCommand {
    pub fn program(&self) -> &str {
        // tokenize never returns an empty vector
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}

/// Replace every `{{port}}` in `template` with `port`.
///
/// Anything that is not the exact placeholder is left alone.
pub fn fill_port(template: &str, port: u16) -> String {
    if template.contains(PORT_PLACEHOLDER) {
        template.replace(PORT_PLACEHOLDER, &port.to_string())
    } else {
        template.to_string()
    }
}

/// Split a command line into an argument vector using shell quoting rules.
pub fn tokenize(command: &str) -> Result<Vec<String>> {
    let argv = shlex::split(command)
        .ok_or_else(|| ReceiverError::malformed(command, "unterminated quote or escape"))?;

    if argv.is_empty() {
        return Err(ReceiverError::malformed(command, "no executable"));
    }

    Ok(argv)
}

/// Resolve the command and environment of `config` for `port`.
///
/// The config itself is never modified, so the same template can be
/// resolved again on every restart.
pub fn resolve(config: &SubprocessConfig, port: u16) -> Result<ResolvedCommand> {
    let argv = tokenize(&fill_port(&config.command_template, port))?;

    let env = config
        .environment
        .iter()
        .map(|var| (var.name.clone(), fill_port(&var.value, port)))
        .collect();

    Ok(ResolvedCommand { argv, env })
}
