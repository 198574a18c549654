//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use url::Url;

/// Ostia - 3scale configuration reconciler
#[derive(Parser, Debug)]
#[command(name = "ostia")]
#[command(version)]
#[command(about = "Keep a 3scale service converged with its OpenAPI definition")]
#[command(
    long_about = "Ostia reads metrics, mapping rules, plans and limits from an OpenAPI definition and creates, updates or deletes whatever differs in the 3scale account-management backend."
)]
pub struct Cli {
    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Commands,
}

/// Settings given on the command line; they win over every other source.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Configuration file (default: ./ostia.toml when present)
    #[arg(short, long, global = true, env = "OSTIA_CONFIG")]
    pub config: Option<PathBuf>,

    /// OpenAPI definition with x-3scale extensions
    #[arg(short, long, global = true)]
    pub definition: Option<PathBuf>,

    /// System name of the service to reconcile
    #[arg(short, long, global = true)]
    pub service: Option<String>,

    /// Admin portal URL
    #[arg(long, global = true)]
    pub portal_url: Option<Url>,

    /// API backend the gateway proxies to
    #[arg(long, global = true)]
    pub upstream: Option<String>,

    /// Log filter when RUST_LOG is unset (e.g. info, debug, ostia_reconciler=trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one reconciliation pass
    Sync {
        /// Print the pass report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Reconcile continuously until Ctrl+C
    Watch {
        /// Seconds between passes
        #[arg(short, long)]
        interval: Option<u64>,

        /// Consecutive failed passes before giving up
        #[arg(long)]
        max_errors: Option<usize>,
    },

    /// Report whether the service matches the definition without changing it
    Check {
        /// Print the status as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Delete the service
    Delete,
}
