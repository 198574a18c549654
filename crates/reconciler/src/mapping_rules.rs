//! Mapping-rule reconciliation.
//!
//! A mapping rule is identified by its value tuple
//! `(pattern, method, metric, delta)`, never by its backend ID. Each desired
//! `(path, method, metric, increment)` usage maps to exactly one rule.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ostia_core::{Endpoints, RouteUsage, equivalent, normalize_method};
use ostia_system_client::{
    MappingRule, MappingRuleId, MappingRuleKey, Metric, MetricId, NewMappingRule,
};
use tracing::{debug, info, warn};

use crate::background::tolerate_missing;
use crate::error::{Error, Result};
use crate::projection::{metric_names, project_endpoints};
use crate::reconciler::PassContext;
use crate::types::{Phase, ReconcileAction};

/// Why a remote rule is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// No desired endpoint has the rule's `(pattern, method)` route.
    Orphaned,
    /// The route is desired but not with this metric and delta.
    Stale,
    /// Another remote rule already carries the same tuple.
    Duplicate,
}

/// A rule to create for a desired usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCreate<'d> {
    pub usage: RouteUsage<'d>,
    pub rule: NewMappingRule,
}

/// Changes needed to make remote rules match the desired endpoints.
#[derive(Debug, Default)]
pub struct RuleDiff<'a, 'd> {
    pub create: Vec<RuleCreate<'d>>,
    pub delete: Vec<(&'a MappingRule, Removal)>,
    /// Usages whose metric does not exist remotely.
    pub unresolved: Vec<RouteUsage<'d>>,
}

impl RuleDiff<'_, '_> {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty() && self.unresolved.is_empty()
    }
}

/// Remote rules whose route no desired endpoint defines.
pub fn compute_orphaned<'a>(desired: &Endpoints, remote: &'a [MappingRule]) -> Vec<&'a MappingRule> {
    remote
        .iter()
        .filter(|rule| !desired.has_route(&rule.pattern, &normalize_method(&rule.http_method)))
        .collect()
}

/// Diff desired endpoints against remote rules.
///
/// Rules kept remotely and rules about to be created share one `known` set,
/// so no tuple is ever created twice or kept twice.
pub fn diff<'a, 'd>(
    desired: &'d Endpoints,
    remote: &'a [MappingRule],
    metrics: &[Metric],
) -> RuleDiff<'a, 'd> {
    let names = metric_names(metrics);
    let ids: HashMap<&str, MetricId> = metrics
        .iter()
        .map(|m| (m.system_name.as_str(), m.id))
        .collect();

    let wanted: HashSet<(&str, String, &str, i64)> = desired
        .usages()
        .map(|u| (u.path, normalize_method(u.method), u.metric, u.increment))
        .collect();

    let orphaned: HashSet<MappingRuleId> = compute_orphaned(desired, remote)
        .into_iter()
        .map(|rule| rule.id)
        .collect();

    let mut diff = RuleDiff::default();
    let mut known: HashSet<MappingRuleKey> = HashSet::new();

    for rule in remote {
        let removal = if orphaned.contains(&rule.id) {
            Some(Removal::Orphaned)
        } else if !names.get(&rule.metric_id).is_some_and(|metric| {
            let method = normalize_method(&rule.http_method);
            wanted.contains(&(rule.pattern.as_str(), method, *metric, rule.delta))
        }) {
            Some(Removal::Stale)
        } else if !known.insert(rule.key()) {
            Some(Removal::Duplicate)
        } else {
            None
        };

        if let Some(removal) = removal {
            diff.delete.push((rule, removal));
        }
    }

    // Endpoints whose remote projection already matches need no creates.
    let projected = project_endpoints(remote, metrics);
    let converged: HashSet<&str> = desired
        .iter()
        .filter(|ep| projected.get(&ep.path).is_some_and(|remote| equivalent(remote, *ep)))
        .map(|ep| ep.path.as_str())
        .collect();

    for usage in desired.usages() {
        if converged.contains(usage.path) {
            continue;
        }
        let Some(metric_id) = ids.get(usage.metric).copied() else {
            diff.unresolved.push(usage);
            continue;
        };
        let rule = NewMappingRule {
            pattern: usage.path.to_string(),
            http_method: normalize_method(usage.method),
            metric_id,
            delta: usage.increment,
        };
        // Duplicate guard: several usages may normalize to the same tuple.
        if known.insert(rule.clone()) {
            diff.create.push(RuleCreate { usage, rule });
        }
    }

    diff
}

pub(crate) async fn reconcile(ctx: &mut PassContext<'_>, desired: &Endpoints) -> Result<()> {
    let service = ctx.service;
    let (rules, metrics) = tokio::try_join!(
        ctx.system.list_mapping_rules(service.id),
        ctx.system.list_metrics(service.id)
    )
    .map_err(|e| Error::read_failed(Phase::MappingRules, e))?;

    if equivalent(&project_endpoints(&rules, &metrics), desired) {
        debug!(service = %service.system_name, "Mapping rules in sync");
        ctx.report.skip(Phase::MappingRules);
        return Ok(());
    }

    let diff = diff(desired, &rules, &metrics);
    debug!(
        service = %service.system_name,
        create = diff.create.len(),
        delete = diff.delete.len(),
        unresolved = diff.unresolved.len(),
        "Reconciling mapping rules"
    );

    for (rule, removal) in diff.delete {
        debug!(pattern = %rule.pattern, http_method = %rule.http_method, ?removal, "Removing mapping rule");
        let system = Arc::clone(ctx.system);
        let (service_id, rule_id) = (service.id, rule.id);
        ctx.background.spawn(
            ReconcileAction::DeleteMappingRule {
                http_method: rule.http_method.clone(),
                pattern: rule.pattern.clone(),
                id: rule.id,
            },
            async move { tolerate_missing(system.delete_mapping_rule(service_id, rule_id).await) },
        );
    }

    for usage in diff.unresolved {
        warn!(
            service = %service.system_name,
            pattern = usage.path,
            http_method = usage.method,
            metric = usage.metric,
            "Metric missing, skipping mapping rule"
        );
        ctx.report.record_failure(
            create_action(usage),
            format!("metric '{}' does not exist", usage.metric),
        );
    }

    for RuleCreate { usage, rule } in diff.create {
        match ctx.system.create_mapping_rule(service.id, &rule).await {
            Ok(created) => {
                info!(
                    service = %service.system_name,
                    pattern = %created.pattern,
                    http_method = %created.http_method,
                    metric = usage.metric,
                    "Created mapping rule"
                );
                ctx.report.record_success(create_action(usage));
            }
            Err(e) => {
                warn!(
                    service = %service.system_name,
                    pattern = usage.path,
                    http_method = usage.method,
                    error = %e,
                    "Failed to create mapping rule"
                );
                ctx.report.record_failure(create_action(usage), e);
            }
        }
    }

    Ok(())
}

fn create_action(usage: RouteUsage<'_>) -> ReconcileAction {
    ReconcileAction::CreateMappingRule {
        http_method: normalize_method(usage.method),
        pattern: usage.path.to_string(),
        metric: usage.metric.to_string(),
        delta: usage.increment,
    }
}
