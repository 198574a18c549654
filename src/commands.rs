//! CLI command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use ostia_core::{ApiDefinition, DesiredState};
use ostia_reconciler::{
    DesiredStateProvider, Error as ReconcileError, PassReport, Reconciler, ReconcilerBuilder,
    ReconciliationLoop,
};
use ostia_system_client::ThreeScaleClient;
use tracing::{error, info};

use crate::cli::Commands;
use crate::config::Config;

/// Desired state read from an API definition file on every pass.
pub struct DefinitionFileProvider {
    path: PathBuf,
    /// Replaces the definition's upstream when set.
    upstream: Option<String>,
}

impl DefinitionFileProvider {
    pub const fn new(path: PathBuf, upstream: Option<String>) -> Self {
        Self { path, upstream }
    }
}

#[async_trait]
impl DesiredStateProvider for DefinitionFileProvider {
    async fn get_desired_state(&self) -> ostia_reconciler::Result<DesiredState> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ReconcileError::desired_state_unavailable(format!("{}: {e}", self.path.display()))
        })?;
        let definition = ApiDefinition::from_yaml_str(&contents).map_err(|e| {
            ReconcileError::desired_state_unavailable(format!("{}: {e}", self.path.display()))
        })?;
        let mut desired = definition.into_desired_state();
        if let Some(upstream) = &self.upstream {
            desired.upstream = Some(upstream.clone());
        }
        Ok(desired)
    }
}

/// Execute a CLI command.
pub async fn execute_command(command: Commands, config: Config) -> Result<()> {
    let reconciler = Arc::new(build_reconciler(&config)?);

    match command {
        Commands::Sync { json } => cmd_sync(&reconciler, &config, json).await,
        Commands::Watch {
            interval,
            max_errors,
        } => cmd_watch(reconciler, config, interval, max_errors).await,
        Commands::Check { json } => cmd_check(&reconciler, &config, json).await,
        Commands::Delete => cmd_delete(&reconciler, &config).await,
    }
}

fn build_reconciler(config: &Config) -> Result<Reconciler> {
    let client = ThreeScaleClient::new(config.client.clone())
        .context("Failed to create the account-management client")?;
    ReconcilerBuilder::new()
        .with_system(Arc::new(client))
        .with_config(config.reconciler.clone())
        .build()
        .context("Invalid reconciler configuration")
}

fn provider(config: &Config) -> Result<DefinitionFileProvider> {
    let path = config
        .definition
        .clone()
        .context("An API definition is required (--definition, OSTIA_DEFINITION or `definition` in the config file)")?;
    Ok(DefinitionFileProvider::new(path, config.upstream.clone()))
}

/// Run one pass.
async fn cmd_sync(reconciler: &Reconciler, config: &Config, json: bool) -> Result<()> {
    let desired = provider(config)?.get_desired_state().await?;
    let report = reconciler
        .sync(&desired, &config.service)
        .await
        .with_context(|| format!("Reconciliation of '{}' failed", config.service))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    report.into_result()?;
    Ok(())
}

/// Run passes until Ctrl+C or too many failures.
async fn cmd_watch(
    reconciler: Arc<Reconciler>,
    config: Config,
    interval: Option<u64>,
    max_errors: Option<usize>,
) -> Result<()> {
    let mut loop_config = config.watch.clone();
    if let Some(secs) = interval.filter(|secs| *secs > 0) {
        loop_config.interval = std::time::Duration::from_secs(secs);
    }
    if let Some(max) = max_errors {
        loop_config.max_errors = max;
    }

    let mut runner = ReconciliationLoop::new(
        reconciler,
        Arc::new(provider(&config)?),
        config.service.clone(),
        loop_config,
    );
    let stopper = runner.stopper();
    let mut handle = tokio::spawn(async move { runner.run().await });

    info!(service = %config.service, "Watching. Press Ctrl+C to stop.");
    tokio::select! {
        joined = &mut handle => {
            joined.context("Reconciliation loop panicked")??;
            return Ok(());
        }
        () = wait_for_shutdown() => stopper.stop(),
    }

    handle.await.context("Reconciliation loop panicked")??;
    info!("Stopped gracefully");
    Ok(())
}

/// Compare without mutating.
async fn cmd_check(reconciler: &Reconciler, config: &Config, json: bool) -> Result<()> {
    let desired = provider(config)?.get_desired_state().await?;
    let status = reconciler
        .check(&desired, &config.service)
        .await
        .with_context(|| format!("Failed to read service '{}'", config.service))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("endpoints: {}", in_sync_label(status.endpoints));
        println!("plans:     {}", in_sync_label(status.plans));
    }

    if !status.in_sync() {
        bail!("Service '{}' is out of sync", config.service);
    }
    Ok(())
}

/// Remove the service.
async fn cmd_delete(reconciler: &Reconciler, config: &Config) -> Result<()> {
    let deleted = reconciler
        .delete(&config.service)
        .await
        .with_context(|| format!("Failed to delete service '{}'", config.service))?;
    if deleted {
        println!("Deleted service '{}'", config.service);
    } else {
        println!("Service '{}' does not exist", config.service);
    }
    Ok(())
}

const fn in_sync_label(in_sync: bool) -> &'static str {
    if in_sync { "in sync" } else { "out of sync" }
}

fn print_report(report: &PassReport) {
    println!("pass {} on '{}'", report.pass_id, report.service);
    for action in &report.actions_taken {
        println!("  applied  {action}");
    }
    for (action, reason) in &report.actions_failed {
        println!("  failed   {action}: {reason}");
    }
    for (phase, reason) in &report.phase_errors {
        println!("  error    {phase}: {reason}");
    }
    for (phase, reason) in &report.ignored {
        println!("  ignored  {phase}: {reason}");
    }
    if report.converged() {
        println!("  already converged");
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, stopping"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
