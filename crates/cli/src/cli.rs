//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Concentrator - time-aligns measurement streams into fixed-rate frames
#[derive(Parser, Debug)]
#[command(
    name = "concentrator",
    author,
    version,
    about = "Real-time measurement concentrator",
    long_about = "Sorts timestamped measurements from many sources into time-aligned frames.\n\n\
                  Runs simulated sources from configuration, concentrates their samples at \n\
                  a fixed frame rate and dispatches published frames to configured sinks."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CONCENTRATOR_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "CONCENTRATOR_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run sources, concentrator and sinks
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display the resolved configuration
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "concentrator.toml",
        env = "CONCENTRATOR_CONFIG"
    )]
    pub config: PathBuf,

    /// Replace the [concentrator] section, e.g. "framesPerSecond=30; lagTime=3; leadTime=1"
    #[arg(long, env = "CONCENTRATOR_SETTINGS")]
    pub settings: Option<String>,

    /// Override the frame rate from configuration
    #[arg(long, env = "CONCENTRATOR_FRAMES_PER_SECOND")]
    pub frames_per_second: Option<u32>,

    /// Stop after this many published frames (0 = unlimited)
    #[arg(long, default_value = "0", env = "CONCENTRATOR_MAX_FRAMES")]
    pub max_frames: u64,

    /// Stop after this many seconds (0 = run until Ctrl+C)
    #[arg(long, default_value = "0", env = "CONCENTRATOR_DURATION")]
    pub duration: u64,

    /// Age of samples injected as late, in seconds (default: twice the lag time)
    #[arg(long, env = "CONCENTRATOR_LATE_DELAY")]
    pub late_delay: Option<f64>,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Channel buffer size for internal queues
    #[arg(long, default_value = "256", env = "CONCENTRATOR_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "CONCENTRATOR_METRICS_PORT")]
    pub metrics_port: u16,

    /// Print the final status report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "concentrator.toml")]
    pub config: PathBuf,

    /// Validate an inline settings string instead of a file
    #[arg(long, conflicts_with = "config")]
    pub settings: Option<String>,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "concentrator.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show per-source details
    #[arg(long)]
    pub sources: bool,

    /// Show sink configuration
    #[arg(long)]
    pub sinks: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::parse_from([
            "concentrator",
            "-v",
            "run",
            "--config",
            "pdc.toml",
            "--duration",
            "10",
            "--max-frames",
            "300",
        ]);
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("pdc.toml"));
                assert_eq!(args.duration, 10);
                assert_eq!(args.max_frames, 300);
                assert!(args.settings.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["concentrator", "-q", "-v", "info"]).is_err());
    }
}
