//! Command-line interface for tunnelg.
use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Levels in `--log-level` numeric order: 0 is `off`, 5 is `trace`.
const LEVELS: [(LevelFilter, &str); 6] = [
    (LevelFilter::OFF, "off"),
    (LevelFilter::ERROR, "error"),
    (LevelFilter::WARN, "warn"),
    (LevelFilter::INFO, "info"),
    (LevelFilter::DEBUG, "debug"),
    (LevelFilter::TRACE, "trace"),
];

/// Log level given with `--log-level`, as a name ("info", "warning") or a
/// number from 0 to 5.
///
/// The flag replaces `RUST_LOG` for one invocation. Without either, tunnelg
/// logs at `info` to stderr and leaves stdout to command output.
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// Filter directive handed to the `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        LEVELS
            .iter()
            .find(|(level, _)| *level == self.0)
            .map_or("info", |(_, name)| *name)
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<usize>() {
            return LEVELS
                .get(number)
                .map(|(level, _)| LogLevelArg(*level))
                .ok_or_else(|| {
                    format!("unsupported log level number '{number}' (expected 0-5)")
                });
        }

        let name = match trimmed.to_ascii_lowercase().as_str() {
            "err" => "error".to_string(),
            "warning" => "warn".to_string(),
            "information" => "info".to_string(),
            other => other.to_string(),
        };
        LEVELS
            .iter()
            .find(|(_, known)| *known == name)
            .map(|(level, _)| LogLevelArg(*level))
            .ok_or_else(|| format!("invalid log level '{trimmed}'"))
    }
}

/// Command-line interface for tunnelg.
#[derive(Parser)]
#[command(name = "tunnelg", version, author)]
#[command(
    about = "Expose a remote IDE server through an inlets tunnel",
    long_about = None
)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Directory for the process registry, license, credentials and logs.
    #[arg(long, value_name = "DIR", global = true, env = "TUNNELG_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Directory systemd units are installed into.
    #[arg(long, value_name = "DIR", global = true, env = "TUNNELG_UNIT_DIR")]
    pub unit_dir: Option<PathBuf>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Environment overlay shared by commands that resolve configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct EnvArgs {
    /// Env file (YAML, JSON or KEY=VALUE lines) loaded before resolving configuration.
    #[arg(long, value_name = "FILE")]
    pub envfile: Option<PathBuf>,

    /// Extra environment entries, as KEY=VALUE. Repeatable.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Let env file and --env entries replace variables already set.
    #[arg(long)]
    pub override_env: bool,
}

/// Available commands for tunnelg.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the tunnel client and the IDE server.
    Start {
        /// Inlets Pro license.
        #[arg(long, env = "INLETS_LICENSE", hide_env_values = true)]
        license: Option<String>,

        /// Replace an existing license file.
        #[arg(long)]
        overwrite_license: bool,

        /// Run the tunnel as a systemd service.
        #[arg(long)]
        service: bool,

        /// Regenerate the systemd unit even if it exists.
        #[arg(long)]
        overwrite_service: bool,

        /// Run the IDE server in the background.
        #[arg(long)]
        background: bool,

        #[command(flatten)]
        env: EnvArgs,

        /// Tunnel option override, as key=value (e.g. client_port=8080). Repeatable.
        #[arg(long = "inlet", value_name = "KEY=VALUE")]
        inlet: Vec<String>,

        /// IDE server option override, as key=value (e.g. ide=jupyter-lab). Repeatable.
        #[arg(long = "server", value_name = "KEY=VALUE")]
        server: Vec<String>,
    },

    /// Stop the IDE server and the tunnel client.
    Stop,

    /// Show whether the tunnel client and IDE server are running.
    Status {
        /// Emit machine-readable JSON output instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show logs of a background process.
    Logs {
        /// Process name (`tunnel` or `ide-server`).
        name: String,

        /// Number of lines to show.
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },

    /// Configuration snapshots.
    #[command(subcommand)]
    Config(ConfigCommands),

    /// IDE server credentials.
    #[command(subcommand)]
    Server(ServerCommands),
}

/// `tunnelg config` subcommands.
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Save the resolved configuration as a YAML env file.
    Save {
        /// Destination (defaults to `config.yaml` in the state directory).
        #[arg(long, value_name = "FILE")]
        path: Option<PathBuf>,

        #[command(flatten)]
        env: EnvArgs,
    },
}

/// `tunnelg server` subcommands.
#[derive(Subcommand)]
pub enum ServerCommands {
    /// Print the stored IDE server password.
    Password,
    /// Print the stored jupyter-lab token.
    Token,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
