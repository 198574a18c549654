//! Remote state projected onto the desired-state shapes.
//!
//! A projection rebuilds `Endpoints`/`Plans` from remote entities so the
//! canonical comparison can tell whether a phase has anything to do.

use std::collections::HashMap;

use futures::future::try_join_all;
use itertools::Itertools;
use ostia_core::{Endpoint, Endpoints, Limit, MetricUsage, OperationId, Plan, Plans, normalize_method};
use ostia_system_client::{
    ApplicationPlan, Limit as RemoteLimit, MappingRule, Metric, MetricId, PlanId, Service,
    SystemApi,
};

use crate::error::Result;

/// Metric ID to system name; unknown IDs render as the raw ID.
pub(crate) fn metric_names(metrics: &[Metric]) -> HashMap<MetricId, &str> {
    metrics
        .iter()
        .map(|m| (m.id, m.system_name.as_str()))
        .collect()
}

fn metric_name(names: &HashMap<MetricId, &str>, id: MetricId) -> String {
    names
        .get(&id)
        .map_or_else(|| id.to_string(), |name| (*name).to_string())
}

/// Rebuild endpoints from remote mapping rules.
///
/// Rules are grouped by pattern, then by method; each rule contributes one
/// metric usage.
pub fn project_endpoints(rules: &[MappingRule], metrics: &[Metric]) -> Endpoints {
    let names = metric_names(metrics);

    rules
        .iter()
        .into_group_map_by(|rule| rule.pattern.as_str())
        .into_iter()
        .map(|(pattern, rules)| Endpoint {
            path: pattern.to_string(),
            operations: rules
                .into_iter()
                .into_group_map_by(|rule| normalize_method(&rule.http_method))
                .into_iter()
                .map(|(method, rules)| OperationId {
                    metrics: rules
                        .iter()
                        .map(|rule| MetricUsage::new(metric_name(&names, rule.metric_id), rule.delta))
                        .collect(),
                    ..OperationId::new(&method, pattern)
                })
                .collect(),
        })
        .collect()
}

/// Rebuild plans from remote plans and their limits.
pub fn assemble_plans(
    plans: &[ApplicationPlan],
    limits: &HashMap<PlanId, Vec<RemoteLimit>>,
    metrics: &[Metric],
) -> Plans {
    let names = metric_names(metrics);

    plans
        .iter()
        .map(|plan| Plan {
            name: plan.name.clone(),
            default: plan.default,
            limits: limits
                .get(&plan.id)
                .into_iter()
                .flatten()
                .map(|limit| {
                    Limit::new(metric_name(&names, limit.metric_id), limit.period.clone(), limit.value)
                })
                .collect(),
        })
        .collect()
}

/// Fetch the limits of every plan concurrently.
pub(crate) async fn fetch_limits(
    system: &dyn SystemApi,
    plans: &[ApplicationPlan],
) -> Result<HashMap<PlanId, Vec<RemoteLimit>>> {
    let limits = try_join_all(plans.iter().map(|plan| async move {
        system
            .list_plan_limits(plan.id)
            .await
            .map(|limits| (plan.id, limits))
    }))
    .await?;
    Ok(limits.into_iter().collect())
}

/// Read the service's endpoints from the backend.
pub async fn read_endpoints(system: &dyn SystemApi, service: &Service) -> Result<Endpoints> {
    let (rules, metrics) = tokio::try_join!(
        system.list_mapping_rules(service.id),
        system.list_metrics(service.id)
    )?;
    Ok(project_endpoints(&rules, &metrics))
}

/// Read the service's plans and limits from the backend.
pub async fn project_plans(system: &dyn SystemApi, service: &Service) -> Result<Plans> {
    let (plans, metrics) = tokio::try_join!(
        system.list_application_plans(service.id),
        system.list_metrics(service.id)
    )?;
    let limits = fetch_limits(system, &plans).await?;
    Ok(assemble_plans(&plans, &limits, &metrics))
}
