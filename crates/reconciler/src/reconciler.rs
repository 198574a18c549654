//! Reconciler implementation.

use std::sync::Arc;

use ostia_core::{DesiredState, equivalent};
use ostia_system_client::{Service, SystemApi};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::background::TaskGroup;
use crate::config::ReconcilerConfig;
use crate::error::{Error, Result};
use crate::projection::{project_plans, read_endpoints};
use crate::scope::{ensure_service, remove_service, resolve_service};
use crate::types::{PassReport, Phase, SyncStatus};
use crate::{mapping_rules, metrics, plans, proxy};

/// State shared by the phases of one pass.
pub(crate) struct PassContext<'a> {
    pub(crate) system: &'a Arc<dyn SystemApi>,
    pub(crate) config: &'a ReconcilerConfig,
    pub(crate) service: &'a Service,
    pub(crate) background: &'a mut TaskGroup,
    pub(crate) report: &'a mut PassReport,
}

/// Convergence engine for one account-management backend.
pub struct Reconciler {
    system: Arc<dyn SystemApi>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(system: Arc<dyn SystemApi>, config: ReconcilerConfig) -> Self {
        Self { system, config }
    }

    /// Run one convergence pass of `desired` against `service`.
    ///
    /// Per-entity failures do not abort the pass; they are collected in the
    /// returned report. Only a failure to list the service's plans is fatal.
    /// Background operations are always settled before this returns.
    pub async fn reconcile(&self, desired: &DesiredState, service: &Service) -> Result<PassReport> {
        let report = PassReport::new(&service.system_name);
        let span = info_span!("pass", pass_id = %report.pass_id, service = %service.system_name);
        self.run_pass(desired, service, report).instrument(span).await
    }

    async fn run_pass(
        &self,
        desired: &DesiredState,
        service: &Service,
        mut report: PassReport,
    ) -> Result<PassReport> {
        info!(
            endpoints = desired.endpoints.len(),
            operations = desired.endpoints.operation_count(),
            plans = desired.plans.len(),
            "Starting reconciliation"
        );

        let mut background = TaskGroup::new(self.config.max_background_tasks);
        let mut ctx = PassContext {
            system: &self.system,
            config: &self.config,
            service,
            background: &mut background,
            report: &mut report,
        };

        for phase in Phase::PIPELINE {
            debug!(phase = %phase, "Entering phase");
            let outcome = match phase {
                Phase::Metrics => metrics::reconcile(&mut ctx, &desired.endpoints).await,
                Phase::MappingRules => mapping_rules::reconcile(&mut ctx, &desired.endpoints).await,
                Phase::PlansAndLimits => plans::reconcile(&mut ctx, &desired.plans).await,
                Phase::Proxy => {
                    // The redeploy must see the routing table as the backend has it.
                    ctx.background.settle(ctx.report).await;
                    proxy::reconcile(&mut ctx, desired).await
                }
            };

            match outcome {
                Ok(()) => {}
                Err(e) if e.is_pass_fatal() => {
                    error!(phase = %phase, error = %e, "Pass aborted");
                    ctx.background.settle(ctx.report).await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(phase = %phase, error = %e, "Phase failed");
                    ctx.report.record_phase_error(phase, e);
                }
            }
        }

        ctx.background.settle(ctx.report).await;
        report.finish();

        if report.converged() {
            info!("Service converged");
        } else {
            info!(
                actions_taken = report.actions_taken.len(),
                actions_failed = report.actions_failed.len(),
                phase_errors = report.phase_errors.len(),
                skipped = report.skipped_phases.len(),
                ignored = report.ignored.len(),
                "Reconciliation complete"
            );
        }

        Ok(report)
    }

    /// Resolve (or create) the service named `system_name`, then reconcile it.
    pub async fn sync(&self, desired: &DesiredState, system_name: &str) -> Result<PassReport> {
        let service = ensure_service(self.system.as_ref(), system_name).await?;
        self.reconcile(desired, &service).await
    }

    /// Compare the remote projections with `desired` without changing anything.
    pub async fn check(&self, desired: &DesiredState, system_name: &str) -> Result<SyncStatus> {
        let system = self.system.as_ref();
        let service = resolve_service(system, system_name).await?;
        let (endpoints, plans) =
            tokio::try_join!(read_endpoints(system, &service), project_plans(system, &service))?;

        Ok(SyncStatus {
            endpoints: equivalent(&endpoints, &desired.endpoints),
            plans: equivalent(&plans, &desired.plans),
        })
    }

    /// Delete the service named `system_name`. Returns whether it existed.
    pub async fn delete(&self, system_name: &str) -> Result<bool> {
        remove_service(self.system.as_ref(), system_name).await
    }

    /// Get the backend.
    pub fn system(&self) -> &Arc<dyn SystemApi> {
        &self.system
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

/// Builder for Reconciler.
#[derive(Default)]
pub struct ReconcilerBuilder {
    system: Option<Arc<dyn SystemApi>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend.
    #[must_use]
    pub fn with_system(mut self, system: Arc<dyn SystemApi>) -> Self {
        self.system = Some(system);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the background task bound.
    #[must_use]
    pub fn max_background_tasks(mut self, max: usize) -> Self {
        self.config.max_background_tasks = max;
        self
    }

    /// Enable/disable proxy promotion.
    #[must_use]
    pub fn promote_proxy(mut self, enabled: bool) -> Self {
        self.config.promote_proxy = enabled;
        self
    }

    /// Build the reconciler.
    pub fn build(self) -> Result<Reconciler> {
        let system = self
            .system
            .ok_or_else(|| Error::invalid_config("Backend is required"))?;
        self.config.validate()?;
        Ok(Reconciler::new(system, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostia_core::{Endpoint, Endpoints, OperationId, Plan, Plans};
    use ostia_system_client::{InMemorySystem, OperationKind};

    fn setup() -> (Reconciler, Arc<InMemorySystem>) {
        let system = Arc::new(InMemorySystem::new());
        let reconciler = Reconciler::new(system.clone(), ReconcilerConfig::default());
        (reconciler, system)
    }

    fn desired() -> DesiredState {
        DesiredState::from_parts(
            Endpoints::new().with_endpoint(
                Endpoint::new("/widgets")
                    .with_operation(OperationId::new("GET", "/widgets").with_metric("hits", 1)),
            ),
            Plans::new().with_plan(Plan::new("basic").with_limit("hits", "month", 100)),
        )
    }

    #[tokio::test]
    async fn test_reconcile_empty() {
        let (reconciler, _) = setup();

        let result = reconciler.sync(&DesiredState::new(), "widgets").await;

        assert!(result.is_ok());
        assert!(result.ok().is_some_and(|r| r.converged()));
    }

    #[tokio::test]
    async fn test_sync_creates_everything() {
        let (reconciler, system) = setup();

        let result = reconciler.sync(&desired(), "widgets").await;

        let report = result.ok();
        assert!(report.as_ref().is_some_and(PassReport::all_succeeded));
        assert_eq!(system.operations(OperationKind::CreateMetric).len(), 1);
        assert_eq!(system.operations(OperationKind::CreateMappingRule).len(), 1);
        assert_eq!(system.operations(OperationKind::CreateApplicationPlan).len(), 1);
        assert_eq!(system.operations(OperationKind::CreatePlanLimit).len(), 1);
    }

    #[tokio::test]
    async fn test_check_reports_drift() {
        let (reconciler, _) = setup();
        let desired = desired();

        assert!(reconciler.sync(&DesiredState::new(), "widgets").await.is_ok());
        let before = reconciler.check(&desired, "widgets").await.ok();
        assert_eq!(before.map(SyncStatus::in_sync), Some(false));

        assert!(reconciler.sync(&desired, "widgets").await.is_ok());
        let after = reconciler.check(&desired, "widgets").await.ok();
        assert_eq!(after.map(SyncStatus::in_sync), Some(true));
    }

    #[tokio::test]
    async fn test_check_missing_service() {
        let (reconciler, _) = setup();
        let result = reconciler.check(&desired(), "widgets").await;
        assert!(matches!(result, Err(Error::ServiceNotFound { .. })));
    }

    #[tokio::test]
    async fn test_plan_enumeration_is_fatal() {
        let (reconciler, system) = setup();
        system.fail_on(OperationKind::ListApplicationPlans);

        let result = reconciler.sync(&desired(), "widgets").await;

        assert!(matches!(result, Err(Error::PlanEnumerationFailed { .. })));
        assert!(system.operations(OperationKind::UpdateProxy).is_empty());
    }

    #[test]
    fn test_builder() {
        let result = ReconcilerBuilder::new()
            .with_system(Arc::new(InMemorySystem::new()))
            .max_background_tasks(2)
            .promote_proxy(false)
            .build();

        let reconciler = result.ok();
        assert_eq!(
            reconciler.as_ref().map(|r| r.config().max_background_tasks),
            Some(2)
        );
        assert_eq!(reconciler.map(|r| r.config().promote_proxy), Some(false));
    }

    #[test]
    fn test_builder_requires_system() {
        let result = ReconcilerBuilder::new().build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder_validates_config() {
        let result = ReconcilerBuilder::new()
            .with_system(Arc::new(InMemorySystem::new()))
            .max_background_tasks(0)
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
