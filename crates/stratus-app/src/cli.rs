//! CLI argument definitions for the Stratus service.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Stratus, a multi-tenant cloud-inventory snapshot service.
#[derive(Parser, Debug)]
#[command(name = "stratus", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Listen address for the query API (host:port).
    #[arg(short = 'l', long = "listen")]
    pub listen: Option<String>,

    /// SQLite database path.
    #[arg(short = 'd', long = "db")]
    pub db: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > STRATUS_CONFIG env var > ./stratus.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("STRATUS_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("stratus.toml")
    }

    /// Resolve the listen address.
    ///
    /// Priority: --listen flag > STRATUS_LISTEN env var > config file value.
    pub fn resolve_listen(&self, config_listen: &str) -> String {
        if let Some(ref listen) = self.listen {
            return listen.clone();
        }
        if let Ok(listen) = std::env::var("STRATUS_LISTEN") {
            return listen;
        }
        config_listen.to_string()
    }

    /// Resolve the log level.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        if let Ok(level) = std::env::var("STRATUS_LOG") {
            return level;
        }
        config_level.to_string()
    }
}
