//! Command-line surface: subcommands, config loading.
//!
//! Grounded on the teacher's `sa-gateway::cli::{Cli, Command,
//! load_config}` shape: a thin `clap` derive front end plus an
//! env-var-overridable config path with a `RuntimeConfig::default()`
//! fallback when no file is present.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use lk_domain::RuntimeConfig;

const CONFIG_ENV_VAR: &str = "LISTKEEPER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "listkeeper.toml";

#[derive(Debug, Parser)]
#[command(name = "listkeeper", about = "Moderation list daemon for the network")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon: firehose ingestion, resolve, reconcile.
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        cache: Option<PathBuf>,
        #[arg(long)]
        expire_cache: bool,
        #[arg(long, conflicts_with = "expire_cache")]
        no_expire_cache: bool,
        #[arg(short = 'v', long)]
        verbose: bool,
    },
    /// Remove one user from one list immediately and exit.
    RemoveUser {
        #[arg(long)]
        user: String,
        #[arg(long)]
        list: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Delete an entire list and exit.
    DeleteList {
        #[arg(long)]
        list: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Load `RuntimeConfig` from (in priority order) the `--config` flag,
/// the `LISTKEEPER_CONFIG` env var, the default path, or
/// `RuntimeConfig::default()` if none of those exist.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let path = explicit
        .map(PathBuf::from)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if !path.exists() {
        tracing::warn!(path = %path.display(), "cli: config file not found, using defaults");
        return Ok(RuntimeConfig::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    let config: RuntimeConfig = toml::from_str(&raw)?;
    Ok(config)
}

pub fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
