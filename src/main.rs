//! # Ostia
//!
//! Keeps a 3scale service converged with its OpenAPI definition.
//!
//! ## Startup
//!
//! 1. **Configuration** - defaults, `ostia.toml`, `OSTIA_*` variables, flags
//! 2. **Tracing** - `RUST_LOG` wins over the configured log level
//! 3. **Command** - `sync`, `watch`, `check` or `delete`
//!
//! Configuration errors stop the process before any remote call is made.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.overrides).context("Failed to load configuration")?;

    init_tracing(&config.log_level);
    debug!(
        service = %config.service,
        portal = %config.client.portal_url,
        "Configuration loaded"
    );

    commands::execute_command(cli.command, config).await
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
