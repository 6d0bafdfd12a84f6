//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG: &str = "execsight.json5";

/// Command line arguments of `execsight-receiver`.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Supervise Prometheus exporters and publish their metrics to Zenoh")]
pub struct ReceiverArgs {
    /// Path to configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_config() {
        let args = ReceiverArgs::try_parse_from(["execsight-receiver"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG));
        assert_eq!(args.log_level, None);
    }

    #[test]
    fn test_args_overrides() {
        let args = ReceiverArgs::try_parse_from([
            "execsight-receiver",
            "-c",
            "/etc/execsight/receiver.json5",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/execsight/receiver.json5"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }
}
