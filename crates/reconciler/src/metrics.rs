//! Metric reconciliation.
//!
//! The desired metrics are exactly the system names referenced by some
//! operation's metric usages. Missing metrics are created before anything
//! else runs because mapping rules and limits need their IDs; orphaned
//! metrics are deleted in the background.

use std::collections::HashSet;
use std::sync::Arc;

use ostia_core::Endpoints;
use ostia_system_client::Metric;
use tracing::{debug, info, warn};

use crate::background::tolerate_missing;
use crate::error::{Error, Result};
use crate::reconciler::PassContext;
use crate::types::{Phase, ReconcileAction};

/// Metric names used by `desired` that do not exist remotely.
pub fn compute_missing<'d>(desired: &'d Endpoints, remote: &[Metric]) -> Vec<&'d str> {
    let existing: HashSet<&str> = remote.iter().map(|m| m.system_name.as_str()).collect();
    desired
        .metric_names()
        .into_iter()
        .filter(|name| !existing.contains(name))
        .collect()
}

/// Remote metrics no desired operation references.
pub fn compute_orphaned<'a>(desired: &Endpoints, remote: &'a [Metric]) -> Vec<&'a Metric> {
    let used = desired.metric_names();
    remote
        .iter()
        .filter(|m| !used.contains(m.system_name.as_str()))
        .collect()
}

pub(crate) async fn reconcile(ctx: &mut PassContext<'_>, desired: &Endpoints) -> Result<()> {
    let service = ctx.service;
    let remote = ctx
        .system
        .list_metrics(service.id)
        .await
        .map_err(|e| Error::read_failed(Phase::Metrics, e))?;

    let missing = compute_missing(desired, &remote);
    let orphaned = compute_orphaned(desired, &remote);

    if missing.is_empty() && orphaned.is_empty() {
        debug!(service = %service.system_name, "Metrics in sync");
        ctx.report.skip(Phase::Metrics);
        return Ok(());
    }

    debug!(
        service = %service.system_name,
        missing = missing.len(),
        orphaned = orphaned.len(),
        "Reconciling metrics"
    );

    // Creates block the pass: later phases resolve these names to IDs.
    for name in missing {
        let action = ReconcileAction::CreateMetric {
            metric: name.to_string(),
        };
        match ctx
            .system
            .create_metric(service.id, name, &ctx.config.metric_unit)
            .await
        {
            Ok(metric) => {
                info!(service = %service.system_name, metric = name, id = %metric.id, "Created metric");
                ctx.report.record_success(action);
            }
            Err(e) => {
                warn!(service = %service.system_name, metric = name, error = %e, "Failed to create metric");
                ctx.report.record_failure(action, e);
            }
        }
    }

    for metric in orphaned {
        let system = Arc::clone(ctx.system);
        let (service_id, metric_id) = (service.id, metric.id);
        ctx.background.spawn(
            ReconcileAction::DeleteMetric {
                metric: metric.system_name.clone(),
                id: metric.id,
            },
            async move { tolerate_missing(system.delete_metric(service_id, metric_id).await) },
        );
    }

    Ok(())
}
