//! CLI argument definitions for the journal binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Semantic retrieval and theme digests over personal journal entries.
#[derive(Parser, Debug)]
#[command(name = "journal", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the persisted index.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Embed a JSONL journal export and publish it as a new index generation.
    Build {
        /// JSONL file with one entry per line.
        #[arg(short = 'j', long = "journal")]
        journal: PathBuf,

        /// Index directory to publish into.
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },

    /// Print the past entries most similar to a query, most similar first.
    Retrieve {
        query: String,

        /// Only return entries written by this user.
        #[arg(short = 'u', long = "user")]
        user: Option<String>,

        /// Maximum number of entries to return.
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,

        /// Index directory to read.
        #[arg(short = 'i', long = "index")]
        index: Option<PathBuf>,
    },

    /// Print a user's recent themes and emotion trends as JSON.
    Digest {
        /// JSONL file with one entry per line.
        #[arg(short = 'j', long = "journal")]
        journal: PathBuf,

        #[arg(short = 'u', long = "user")]
        user: String,

        /// Trailing window in days, counting today.
        #[arg(long = "days")]
        days: Option<u32>,

        /// Number of themes to group entries into.
        #[arg(long = "clusters")]
        clusters: Option<usize>,

        /// Number of emotion tags to report.
        #[arg(long = "top-emotions")]
        top_emotions: Option<usize>,

        /// Treat this date (YYYY-MM-DD) as today.
        #[arg(long = "today")]
        today: Option<chrono::NaiveDate>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > JOURNAL_CONFIG env var > platform default (~/.journal/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("JOURNAL_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Returns `None` if not overridden (use config value).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Returns `None` if not overridden.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".journal").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".journal").join("config.toml");
    }
    PathBuf::from("config.toml")
}
