//! Plan and limit reconciliation.
//!
//! Plans are matched by name. Within a plan a limit is identified by
//! `(metric, period)`; after a pass each plan holds at most one limit per
//! such pair.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ostia_core::{Limit as DesiredLimit, Plan, Plans, equivalent};
use ostia_system_client::{ApplicationPlan, Limit as RemoteLimit, LimitId, Metric, MetricId};
use tracing::{debug, error, info, warn};

use crate::background::tolerate_missing;
use crate::error::{Error, Result};
use crate::projection::{assemble_plans, fetch_limits};
use crate::reconciler::PassContext;
use crate::types::{Phase, ReconcileAction};

/// What to do for one desired limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitStep<'a> {
    /// A matching remote limit already carries the desired value.
    Keep(&'a RemoteLimit),
    /// A matching remote limit exists with another value.
    Update { limit: &'a RemoteLimit, to: i64 },
    /// No remote limit for this `(metric, period)`.
    Create { metric_id: MetricId, max: i64 },
    /// The metric does not exist remotely.
    UnknownMetric,
    /// An earlier desired limit already claimed this `(metric, period)`.
    Shadowed,
}

/// Limit changes for one plan.
#[derive(Debug, Default)]
pub struct LimitPlan<'d, 'a> {
    /// One step per desired limit, in definition order.
    pub steps: Vec<(&'d DesiredLimit, LimitStep<'a>)>,
    /// Remote limits no desired limit keeps.
    pub delete: Vec<&'a RemoteLimit>,
}

impl LimitPlan<'_, '_> {
    /// Check whether applying this plan would issue no remote call.
    pub fn is_noop(&self) -> bool {
        self.delete.is_empty()
            && self
                .steps
                .iter()
                .all(|(_, step)| matches!(step, LimitStep::Keep(_) | LimitStep::Shadowed))
    }
}

/// Match the desired limits of `plan` against its remote limits.
pub fn diff_limits<'d, 'a>(
    plan: &'d Plan,
    remote: &'a [RemoteLimit],
    metrics: &[Metric],
) -> LimitPlan<'d, 'a> {
    let ids: HashMap<&str, MetricId> = metrics
        .iter()
        .map(|m| (m.system_name.as_str(), m.id))
        .collect();
    let mut claimed: HashSet<(MetricId, &str)> = HashSet::new();
    let mut kept: HashSet<LimitId> = HashSet::new();
    let mut out = LimitPlan::default();

    for limit in &plan.limits {
        let Some(metric_id) = ids.get(limit.metric.as_str()).copied() else {
            out.steps.push((limit, LimitStep::UnknownMetric));
            continue;
        };
        if !claimed.insert((metric_id, limit.period.as_str())) {
            out.steps.push((limit, LimitStep::Shadowed));
            continue;
        }
        let step = match remote
            .iter()
            .find(|r| r.metric_id == metric_id && r.period == limit.period)
        {
            Some(found) => {
                kept.insert(found.id);
                if found.value == limit.max {
                    LimitStep::Keep(found)
                } else {
                    LimitStep::Update {
                        limit: found,
                        to: limit.max,
                    }
                }
            }
            None => LimitStep::Create {
                metric_id,
                max: limit.max,
            },
        };
        out.steps.push((limit, step));
    }

    out.delete = remote.iter().filter(|r| !kept.contains(&r.id)).collect();
    out
}

/// Split `desired` into the first plan of each name and the later repeats.
///
/// A plan name is unique within a service, so only the first definition of
/// a name is reconciled.
pub fn split_repeated_plans(desired: &Plans) -> (Plans, Vec<&Plan>) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut unique = Vec::new();
    let mut repeated = Vec::new();
    for plan in desired.iter() {
        if seen.insert(plan.name.as_str()) {
            unique.push(plan.clone());
        } else {
            repeated.push(plan);
        }
    }
    (unique.into_iter().collect(), repeated)
}

/// Remote plans to delete: unknown names, and repeats of a name.
pub fn compute_unwanted<'a>(desired: &Plans, remote: &'a [ApplicationPlan]) -> Vec<&'a ApplicationPlan> {
    let mut seen = HashSet::new();
    remote
        .iter()
        .filter(|plan| !desired.contains(&plan.name) || !seen.insert(plan.name.as_str()))
        .collect()
}

pub(crate) async fn reconcile(ctx: &mut PassContext<'_>, desired: &Plans) -> Result<()> {
    let service = ctx.service;
    let (unique, repeated) = split_repeated_plans(desired);
    for plan in repeated {
        warn!(service = %service.system_name, plan = %plan.name, "Plan defined more than once, first wins");
        ctx.report.ignore(
            Phase::PlansAndLimits,
            format!("plan '{}' is defined more than once", plan.name),
        );
    }
    let desired = &unique;

    let remote = ctx
        .system
        .list_application_plans(service.id)
        .await
        .map_err(|e| {
            error!(service = %service.system_name, error = %e, "Failed to list application plans");
            Error::plan_enumeration_failed(&service.system_name, e)
        })?;

    if already_converged(ctx, desired, &remote).await {
        debug!(service = %service.system_name, "Plans in sync");
        ctx.report.skip(Phase::PlansAndLimits);
        return Ok(());
    }

    let mut by_name: HashMap<&str, ApplicationPlan> = HashMap::new();
    for plan in &remote {
        by_name
            .entry(plan.name.as_str())
            .or_insert_with(|| plan.clone());
    }

    for plan in compute_unwanted(desired, &remote) {
        debug!(service = %service.system_name, plan = %plan.name, "Removing application plan");
        let system = Arc::clone(ctx.system);
        let (service_id, plan_id) = (service.id, plan.id);
        ctx.background.spawn(
            ReconcileAction::DeletePlan {
                plan: plan.name.clone(),
                id: plan.id,
            },
            async move { tolerate_missing(system.delete_application_plan(service_id, plan_id).await) },
        );
    }

    for plan in desired.iter() {
        let existing = by_name.get(plan.name.as_str()).cloned();
        let resolved = match existing {
            Some(existing) => existing,
            None => {
                let action = ReconcileAction::CreatePlan {
                    plan: plan.name.clone(),
                };
                let created = ctx
                    .system
                    .create_application_plan(service.id, &plan.name, ctx.config.plan_state)
                    .await;
                match created {
                    Ok(created) => {
                        info!(service = %service.system_name, plan = %plan.name, id = %created.id, "Created application plan");
                        ctx.report.record_success(action);
                        by_name.insert(plan.name.as_str(), created.clone());
                        created
                    }
                    Err(e) => {
                        warn!(service = %service.system_name, plan = %plan.name, error = %e, "Failed to create application plan");
                        ctx.report.record_failure(action, e);
                        continue;
                    }
                }
            }
        };

        if plan.default && !resolved.default {
            let action = ReconcileAction::SetDefaultPlan {
                plan: plan.name.clone(),
                id: resolved.id,
            };
            let outcome = ctx
                .system
                .set_default_application_plan(service.id, resolved.id)
                .await;
            if ctx.report.record(action, outcome).is_some() {
                info!(service = %service.system_name, plan = %plan.name, "Made application plan the default");
            }
        }

        converge_limits(ctx, plan, &resolved).await;
    }

    Ok(())
}

/// Compare the remote projection with `desired`. A failed read counts as
/// not converged; the full diff re-reads what it needs.
async fn already_converged(
    ctx: &PassContext<'_>,
    desired: &Plans,
    remote: &[ApplicationPlan],
) -> bool {
    let system = &**ctx.system;
    let read = tokio::try_join!(
        fetch_limits(system, remote),
        async { system.list_metrics(ctx.service.id).await.map_err(Error::from) }
    );
    match read {
        Ok((limits, metrics)) => equivalent(&assemble_plans(remote, &limits, &metrics), desired),
        Err(e) => {
            debug!(service = %ctx.service.system_name, error = %e, "Plan pre-check failed");
            false
        }
    }
}

async fn converge_limits(ctx: &mut PassContext<'_>, plan: &Plan, resolved: &ApplicationPlan) {
    let service = ctx.service;
    let (limits, metrics) = tokio::join!(
        ctx.system.list_plan_limits(resolved.id),
        ctx.system.list_metrics(service.id)
    );
    let (remote, metrics) = match (limits, metrics) {
        (Ok(limits), Ok(metrics)) => (limits, metrics),
        (Err(e), _) | (_, Err(e)) => {
            warn!(service = %service.system_name, plan = %plan.name, error = %e, "Failed to read limits");
            ctx.report
                .record_phase_error(Phase::PlansAndLimits, format!("plan '{}': {e}", plan.name));
            return;
        }
    };

    let diff = diff_limits(plan, &remote, &metrics);
    if diff.is_noop() {
        debug!(service = %service.system_name, plan = %plan.name, "Limits in sync");
        return;
    }

    for (limit, step) in diff.steps {
        match step {
            LimitStep::Keep(_) => {}
            LimitStep::Shadowed => {
                debug!(plan = %plan.name, metric = %limit.metric, period = %limit.period, "Limit repeated, first wins");
            }
            LimitStep::UnknownMetric => {
                error!(
                    service = %service.system_name,
                    plan = %plan.name,
                    metric = %limit.metric,
                    "Metric missing, skipping limit"
                );
                ctx.report.record_failure(
                    ReconcileAction::CreateLimit {
                        plan: plan.name.clone(),
                        metric: limit.metric.clone(),
                        period: limit.period.clone(),
                        max: limit.max,
                    },
                    format!("metric '{}' does not exist", limit.metric),
                );
            }
            LimitStep::Update { limit: found, to } => {
                let system = Arc::clone(ctx.system);
                let (plan_id, metric_id, limit_id) = (resolved.id, found.metric_id, found.id);
                ctx.background.spawn(
                    ReconcileAction::UpdateLimit {
                        plan: plan.name.clone(),
                        metric: limit.metric.clone(),
                        period: limit.period.clone(),
                        id: found.id,
                        from: found.value,
                        to,
                    },
                    async move {
                        system
                            .update_plan_limit(plan_id, metric_id, limit_id, to)
                            .await
                            .map(|_| ())
                    },
                );
            }
            LimitStep::Create { metric_id, max } => {
                let action = ReconcileAction::CreateLimit {
                    plan: plan.name.clone(),
                    metric: limit.metric.clone(),
                    period: limit.period.clone(),
                    max,
                };
                let outcome = ctx
                    .system
                    .create_plan_limit(resolved.id, metric_id, &limit.period, max)
                    .await;
                match outcome {
                    Ok(_) => {
                        info!(plan = %plan.name, metric = %limit.metric, period = %limit.period, max, "Created limit");
                        ctx.report.record_success(action);
                    }
                    Err(e) => {
                        warn!(plan = %plan.name, metric = %limit.metric, period = %limit.period, error = %e, "Failed to create limit");
                        ctx.report.record_failure(action, e);
                    }
                }
            }
        }
    }

    let names: HashMap<MetricId, &str> = metrics
        .iter()
        .map(|m| (m.id, m.system_name.as_str()))
        .collect();
    for stale in diff.delete {
        let metric = names
            .get(&stale.metric_id)
            .map_or_else(|| stale.metric_id.to_string(), |name| (*name).to_string());
        let system = Arc::clone(ctx.system);
        let (plan_id, metric_id, limit_id) = (resolved.id, stale.metric_id, stale.id);
        ctx.background.spawn(
            ReconcileAction::DeleteLimit {
                plan: plan.name.clone(),
                metric,
                period: stale.period.clone(),
                id: stale.id,
            },
            async move { tolerate_missing(system.delete_plan_limit(plan_id, metric_id, limit_id).await) },
        );
    }
}
