//! Command-line interface.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Operator tool for auto-refreshing PostgreSQL-backed caches.
#[derive(Debug, Parser)]
#[command(name = "pgmirror", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, value_name = "FILE", env = "PGMIRROR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v for debug, -vv for trace); RUST_LOG wins
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Install change monitoring on the tables of every configured cache
    Install,
    /// Print the current fingerprint of a cache's monitored tables
    Fingerprint {
        /// Name of the configured cache
        cache: String,
    },
    /// Load a cache once and print records as JSON
    Get {
        /// Name of the configured cache
        cache: String,
        /// Keys to look up
        #[arg(required_unless_present = "all")]
        keys: Vec<String>,
        /// Print every record instead of looking up keys
        #[arg(long, conflicts_with = "keys")]
        all: bool,
    },
    /// Keep a cache loaded and log its refreshes until interrupted
    Watch {
        /// Name of the configured cache
        cache: String,
    },
}

impl Cli {
    /// Default log filter for the requested verbosity.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
