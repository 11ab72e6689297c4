//! Command line definition for the managing binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use eyre::{Result, WrapErr};
use subnet_managing::ManagingConfig;

/// Subnet managing service: miner scores, rate limits and sampling.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Logging configuration (applies to all subcommands).
    #[command(flatten)]
    pub(crate) logs: LogArgs,

    /// Service configuration.
    #[command(flatten)]
    pub(crate) config: ConfigArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Print the effective configuration as TOML.
    Config,
    /// List every stored miner with its score and quota.
    Inspect(InspectArgs),
    /// Drive an in-memory service with concurrent synthetic validators.
    Simulate(SimulateArgs),
}

#[derive(Debug, Clone, Args)]
pub(crate) struct LogArgs {
    /// Silence all log output except errors.
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv, -vvv, etc.).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbosity: u8,

    /// Log filter directive (e.g., "subnet_managing=debug").
    #[arg(long = "log.filter", value_name = "DIRECTIVE", global = true)]
    pub(crate) filter: Option<String>,

    /// Use JSON format for log output.
    #[arg(long = "log.json", global = true)]
    pub(crate) json: bool,
}

/// Config file plus flag overrides. Flags win over the file.
#[derive(Debug, Clone, Args)]
pub(crate) struct ConfigArgs {
    /// TOML configuration file.
    #[arg(long, short = 'c', env = "MANAGING_CONFIG", global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Number of recent scores averaged per miner.
    #[arg(long = "scores.history-len", value_name = "N", global = true)]
    pub(crate) history_len: Option<usize>,

    /// Default quota per miner per window.
    #[arg(long = "rate-limit.capacity", value_name = "N", global = true)]
    pub(crate) capacity: Option<u64>,

    /// Default rate limit window in seconds.
    #[arg(long = "rate-limit.window", value_name = "SECS", global = true)]
    pub(crate) window_secs: Option<u64>,

    /// Reject operations on miners that were not registered first.
    #[arg(long, global = true)]
    pub(crate) require_registration: bool,

    /// JSON file backing the miner store.
    #[arg(long = "store.path", value_name = "FILE", global = true)]
    pub(crate) store_path: Option<PathBuf>,
}

impl ConfigArgs {
    /// Load the config file if given, then apply flag overrides.
    pub(crate) fn resolve(&self) -> Result<ManagingConfig> {
        let mut config = match &self.config {
            Some(path) => ManagingConfig::load(path)
                .wrap_err_with(|| format!("failed to load config: {}", path.display()))?,
            None => ManagingConfig::default(),
        };

        if let Some(history_len) = self.history_len {
            config.history_len = history_len;
        }
        if let Some(capacity) = self.capacity {
            config.rate_limit.capacity = capacity;
        }
        if let Some(window_secs) = self.window_secs {
            config.rate_limit.window_secs = window_secs;
        }
        if self.require_registration {
            config.require_registration = true;
        }
        if let Some(path) = &self.store_path {
            config.store.path = Some(path.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Args)]
pub(crate) struct InspectArgs {
    /// Only show the best N miners by representative score.
    #[arg(long, value_name = "N")]
    pub(crate) top: Option<usize>,
}

#[derive(Debug, Clone, Args)]
pub(crate) struct SimulateArgs {
    /// Number of simulated miners.
    #[arg(long, default_value_t = 16)]
    pub(crate) miners: usize,

    /// Number of concurrent validator tasks.
    #[arg(long, default_value_t = 4)]
    pub(crate) validators: usize,

    /// Requests issued by each validator.
    #[arg(long, default_value_t = 500)]
    pub(crate) requests: usize,

    /// Minimum representative score for organic routing.
    #[arg(long, default_value_t = 0.5)]
    pub(crate) threshold: f64,

    /// Share of requests routed as organic traffic, in [0, 1].
    #[arg(long, default_value_t = 0.5)]
    pub(crate) organic_share: f64,

    /// RNG seed for miner quality and validator decisions.
    #[arg(long)]
    pub(crate) seed: Option<u64>,
}
