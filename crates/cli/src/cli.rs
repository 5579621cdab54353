//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// sta-ingest - SensorThings configuration reconciliation and streaming ingestion
#[derive(Parser, Debug)]
#[command(
    name = "sta-ingest",
    author,
    version,
    about = "SensorThings configuration reconciliation and streaming ingestion",
    long_about = "Loads declarative sensor documents, reconciles them against a SensorThings \n\
                  entity store, then streams vendor sensor readings into it as Observations."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "STA_INGEST_VERBOSE")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "STA_INGEST_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile the store, then stream sensor readings until stopped
    Run(RunArgs),

    /// Reconcile the store against the sensor documents and exit
    Reconcile(ReconcileArgs),

    /// Validate settings and sensor documents without network access
    Validate(ValidateArgs),

    /// Display the merged entity graph
    Info(InfoArgs),
}

/// Where settings and sensor documents come from
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Engine settings file (TOML or JSON); missing means defaults
    #[arg(
        short,
        long,
        default_value = "sta-ingest.toml",
        env = "STA_INGEST_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the sensor documents directory from the settings
    #[arg(long, env = "STA_INGEST_SENSORS_DIR")]
    pub sensors_dir: Option<PathBuf>,

    /// Skip sensor documents that fail to parse or validate
    #[arg(long)]
    pub skip_invalid: bool,
}

/// Entity store connection overrides
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Override the store endpoint from the settings
    #[arg(long, env = "FROST_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Override the store user from the settings
    #[arg(long, env = "FROST_USER")]
    pub user: Option<String>,

    /// Store password
    #[arg(long, env = "FROST_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Load and validate everything, print a summary and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Stop after this many seconds (default: run until signalled)
    #[arg(long)]
    pub duration: Option<u64>,

    /// Prometheus metrics port (overrides the settings; 0 = disabled)
    #[arg(long, env = "STA_INGEST_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// Arguments for the `reconcile` command
#[derive(Parser, Debug)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Output the reconcile report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// List entity names per kind
    #[arg(long)]
    pub entities: bool,
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

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "sta-ingest",
            "-v",
            "run",
            "--config",
            "engine.toml",
            "--sensors-dir",
            "docs",
            "--skip-invalid",
            "--duration",
            "30",
            "--endpoint",
            "http://frost:8080/FROST-Server/v1.1",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config.config, PathBuf::from("engine.toml"));
        assert_eq!(args.config.sensors_dir, Some(PathBuf::from("docs")));
        assert!(args.config.skip_invalid);
        assert_eq!(args.duration, Some(30));
        assert_eq!(
            args.store.endpoint.as_deref(),
            Some("http://frost:8080/FROST-Server/v1.1")
        );
    }

    #[test]
    fn test_parse_info_json() {
        let cli = Cli::try_parse_from(["sta-ingest", "info", "--entities", "--json"]).unwrap();
        let Commands::Info(args) = cli.command else {
            panic!("expected info");
        };
        assert!(args.entities && args.json);
    }
}
