//! Continuous reconciliation loop.

use std::sync::Arc;
use std::time::Duration;

use ostia_core::DesiredState;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::reconciler::Reconciler;

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Interval between reconciliation passes.
    pub interval: Duration,
    /// Maximum consecutive errors before stopping.
    pub max_errors: usize,
    /// Whether to stop on first error.
    pub stop_on_error: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_errors: 10,
            stop_on_error: false,
        }
    }
}

/// Source of the desired state for each pass.
#[async_trait::async_trait]
pub trait DesiredStateProvider: Send + Sync {
    /// Get the current desired state.
    async fn get_desired_state(&self) -> Result<DesiredState>;
}

/// Simple in-memory desired state provider.
pub struct InMemoryDesiredStateProvider {
    state: tokio::sync::RwLock<DesiredState>,
}

impl InMemoryDesiredStateProvider {
    /// Create a new provider with initial state.
    pub fn new(state: DesiredState) -> Self {
        Self {
            state: tokio::sync::RwLock::new(state),
        }
    }

    /// Replace the desired state.
    pub async fn update(&self, state: DesiredState) {
        *self.state.write().await = state;
    }

    /// Edit the desired state in place.
    pub async fn modify<F>(&self, f: F)
    where
        F: FnOnce(&mut DesiredState),
    {
        let mut state = self.state.write().await;
        f(&mut state);
    }
}

#[async_trait::async_trait]
impl DesiredStateProvider for InMemoryDesiredStateProvider {
    async fn get_desired_state(&self) -> Result<DesiredState> {
        Ok(self.state.read().await.clone())
    }
}

/// Continuous reconciliation loop.
///
/// Periodically reads the desired state and runs a pass against one
/// service.
pub struct ReconciliationLoop {
    reconciler: Arc<Reconciler>,
    desired_provider: Arc<dyn DesiredStateProvider>,
    /// System name of the reconciled service.
    service: String,
    config: LoopConfig,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    pub fn new(
        reconciler: Arc<Reconciler>,
        desired_provider: Arc<dyn DesiredStateProvider>,
        service: impl Into<String>,
        config: LoopConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            reconciler,
            desired_provider,
            service: service.into(),
            config,
            stop_rx,
            stop_tx,
        }
    }

    /// Run the reconciliation loop.
    ///
    /// This runs until stopped or max errors reached. A pass that ends with
    /// failed operations counts as an error.
    pub async fn run(&mut self) -> Result<()> {
        if *self.stop_rx.borrow() {
            return Err(Error::LoopStopped);
        }

        info!(
            service = %self.service,
            interval_ms = self.config.interval.as_millis(),
            "Starting reconciliation loop"
        );

        let mut consecutive_errors = 0usize;
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.reconcile_once().await {
                        Ok(converged) => {
                            consecutive_errors = 0;
                            if converged {
                                debug!(service = %self.service, "Service converged");
                            }
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            error!(
                                service = %self.service,
                                error = %e,
                                consecutive = consecutive_errors,
                                "Reconciliation error"
                            );

                            if self.config.stop_on_error {
                                return Err(e);
                            }

                            if consecutive_errors >= self.config.max_errors {
                                error!("Max errors reached, stopping loop");
                                return Err(Error::reconcile_failed(format!(
                                    "Max errors ({}) reached",
                                    self.config.max_errors
                                )));
                            }
                        }
                    }
                }
                _ = self.stop_rx.changed() => {
                    if *self.stop_rx.borrow() {
                        info!(service = %self.service, "Reconciliation loop stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run a single pass. Returns whether the service was already converged.
    pub async fn reconcile_once(&self) -> Result<bool> {
        let desired = self.desired_provider.get_desired_state().await?;
        let report = self.reconciler.sync(&desired, &self.service).await?;
        Ok(report.into_result()?.converged())
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
