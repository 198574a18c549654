//! In-memory implementation of [`SystemApi`].
//!
//! Behaves like the real backend for everything the reconciler observes:
//! sequential IDs, uniqueness checks, cascading deletes and proxy versions.
//! Every call is recorded in a journal, and failures can be injected per
//! operation kind (optionally narrowed to one target).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::api::SystemApi;
use crate::error::{Error, Result};
use crate::types::{
    ApplicationPlan, Environment, Limit, LimitId, MappingRule, MappingRuleId, Metric, MetricId,
    NewMappingRule, PlanId, PlanState, Proxy, ProxyConfig, Service, ServiceId,
};

/// Kind of a journaled backend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    ListServices,
    CreateService,
    DeleteService,
    ListMetrics,
    CreateMetric,
    DeleteMetric,
    ListMappingRules,
    CreateMappingRule,
    DeleteMappingRule,
    ListApplicationPlans,
    CreateApplicationPlan,
    DeleteApplicationPlan,
    SetDefaultApplicationPlan,
    ListPlanLimits,
    CreatePlanLimit,
    UpdatePlanLimit,
    DeletePlanLimit,
    ReadProxy,
    UpdateProxy,
    LatestProxyConfig,
    PromoteProxyConfig,
}

impl OperationKind {
    /// Whether the operation changes remote state.
    pub const fn is_mutation(self) -> bool {
        !matches!(
            self,
            Self::ListServices
                | Self::ListMetrics
                | Self::ListMappingRules
                | Self::ListApplicationPlans
                | Self::ListPlanLimits
                | Self::ReadProxy
                | Self::LatestProxyConfig
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ListServices => "list services",
            Self::CreateService => "create service",
            Self::DeleteService => "delete service",
            Self::ListMetrics => "list metrics",
            Self::CreateMetric => "create metric",
            Self::DeleteMetric => "delete metric",
            Self::ListMappingRules => "list mapping rules",
            Self::CreateMappingRule => "create mapping rule",
            Self::DeleteMappingRule => "delete mapping rule",
            Self::ListApplicationPlans => "list application plans",
            Self::CreateApplicationPlan => "create application plan",
            Self::DeleteApplicationPlan => "delete application plan",
            Self::SetDefaultApplicationPlan => "set default application plan",
            Self::ListPlanLimits => "list plan limits",
            Self::CreatePlanLimit => "create plan limit",
            Self::UpdatePlanLimit => "update plan limit",
            Self::DeletePlanLimit => "delete plan limit",
            Self::ReadProxy => "read proxy",
            Self::UpdateProxy => "update proxy",
            Self::LatestProxyConfig => "read latest proxy config",
            Self::PromoteProxyConfig => "promote proxy config",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A journaled call.
///
/// `target` names the entity by its natural key: a system name, a plan
/// name, `METHOD pattern` for mapping rules and `plan/metric/period` for
/// limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub target: String,
}

/// Makes matching calls fail with a 500.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRule {
    pub kind: OperationKind,
    pub target: Option<String>,
}

impl FailureRule {
    fn matches(&self, kind: OperationKind, target: &str) -> bool {
        self.kind == kind && self.target.as_deref().is_none_or(|t| t == target)
    }
}

/// Gateway proxy state of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyStatus {
    pub api_backend: Option<String>,
    /// Mapping rules changed since the last sandbox deployment.
    pub pending_changes: bool,
    /// 0 until the first deployment.
    pub sandbox_version: u64,
    pub production_version: Option<u64>,
}

#[derive(Debug, Default)]
struct ServiceState {
    service: Option<Service>,
    metrics: Vec<Metric>,
    rules: Vec<MappingRule>,
    plans: Vec<ApplicationPlan>,
    limits: Vec<Limit>,
    proxy: ProxyStatus,
}

#[derive(Debug, Default)]
struct State {
    last_id: u64,
    services: BTreeMap<ServiceId, ServiceState>,
    plan_owner: HashMap<PlanId, ServiceId>,
    journal: Vec<Operation>,
    failures: Vec<FailureRule>,
}

/// In-memory account-management backend.
#[derive(Debug, Default)]
pub struct InMemorySystem {
    state: Mutex<State>,
}

impl InMemorySystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every call of `kind`.
    pub fn fail_on(&self, kind: OperationKind) {
        self.lock().failures.push(FailureRule { kind, target: None });
    }

    /// Fail calls of `kind` against `target` only.
    pub fn fail_on_target(&self, kind: OperationKind, target: impl Into<String>) {
        self.lock().failures.push(FailureRule {
            kind,
            target: Some(target.into()),
        });
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every call made so far, in order.
    pub fn journal(&self) -> Vec<Operation> {
        self.lock().journal.clone()
    }

    /// Calls that change remote state, in order.
    pub fn mutations(&self) -> Vec<Operation> {
        self.lock()
            .journal
            .iter()
            .filter(|op| op.kind.is_mutation())
            .cloned()
            .collect()
    }

    /// Calls of one kind, in order.
    pub fn operations(&self, kind: OperationKind) -> Vec<Operation> {
        self.lock()
            .journal
            .iter()
            .filter(|op| op.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Proxy state of a service.
    pub fn proxy_status(&self, service: ServiceId) -> Option<ProxyStatus> {
        self.lock().services.get(&service).map(|s| s.proxy.clone())
    }

    // Seeding helpers: apply state directly without journaling or failure
    // injection.

    pub fn seed_service(&self, system_name: &str) -> Result<Service> {
        self.lock().create_service(system_name, system_name)
    }

    pub fn seed_metric(&self, service: ServiceId, system_name: &str) -> Result<Metric> {
        self.lock().create_metric(service, system_name, "hits")
    }

    pub fn seed_mapping_rule(
        &self,
        service: ServiceId,
        http_method: &str,
        pattern: &str,
        metric: MetricId,
        delta: i64,
    ) -> Result<MappingRule> {
        let rule = NewMappingRule {
            pattern: pattern.to_string(),
            http_method: http_method.to_string(),
            metric_id: metric,
            delta,
        };
        self.lock().create_mapping_rule(service, &rule)
    }

    pub fn seed_plan(&self, service: ServiceId, name: &str) -> Result<ApplicationPlan> {
        self.lock()
            .create_application_plan(service, name, PlanState::Publish)
    }

    pub fn seed_limit(
        &self,
        plan: PlanId,
        metric: MetricId,
        period: &str,
        value: i64,
    ) -> Result<Limit> {
        self.lock().create_plan_limit(plan, metric, period, value)
    }

    pub fn seed_proxy(&self, service: ServiceId, api_backend: &str) -> Result<Proxy> {
        self.lock().update_proxy(service, api_backend)
    }
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    /// Journal a call and apply failure injection.
    fn begin(&mut self, kind: OperationKind, target: String) -> Result<()> {
        let injected = self.failures.iter().any(|rule| rule.matches(kind, &target));
        self.journal.push(Operation { kind, target });
        if injected {
            return Err(Error::unexpected_status(kind.as_str(), 500, "injected failure"));
        }
        Ok(())
    }

    fn service(&self, id: ServiceId) -> Result<&ServiceState> {
        self.services
            .get(&id)
            .ok_or_else(|| Error::not_found("service", id))
    }

    fn service_mut(&mut self, id: ServiceId) -> Result<&mut ServiceState> {
        self.services
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("service", id))
    }

    fn plan_service(&self, plan: PlanId) -> Result<ServiceId> {
        self.plan_owner
            .get(&plan)
            .copied()
            .ok_or_else(|| Error::not_found("application plan", plan))
    }

    fn metric_name(&self, service: ServiceId, metric: MetricId) -> String {
        self.services
            .get(&service)
            .and_then(|s| s.metrics.iter().find(|m| m.id == metric))
            .map_or_else(|| metric.to_string(), |m| m.system_name.clone())
    }

    fn plan_name(&self, plan: PlanId) -> String {
        self.plan_owner
            .get(&plan)
            .and_then(|service| self.services.get(service))
            .and_then(|s| s.plans.iter().find(|p| p.id == plan))
            .map_or_else(|| plan.to_string(), |p| p.name.clone())
    }

    fn limit_target(&self, plan: PlanId, metric: MetricId, period: &str) -> String {
        let metric_name = self
            .plan_owner
            .get(&plan)
            .map_or_else(|| metric.to_string(), |s| self.metric_name(*s, metric));
        format!("{}/{metric_name}/{period}", self.plan_name(plan))
    }

    fn limit_period(&self, plan: PlanId, limit: LimitId) -> String {
        self.plan_owner
            .get(&plan)
            .and_then(|s| self.services.get(s))
            .and_then(|s| s.limits.iter().find(|l| l.id == limit))
            .map_or_else(|| limit.to_string(), |l| l.period.clone())
    }

    fn rule_target(&self, service: ServiceId, rule: MappingRuleId) -> String {
        self.services
            .get(&service)
            .and_then(|s| s.rules.iter().find(|r| r.id == rule))
            .map_or_else(
                || rule.to_string(),
                |r| format!("{} {}", r.http_method, r.pattern),
            )
    }

    fn create_service(&mut self, name: &str, system_name: &str) -> Result<Service> {
        if self
            .services
            .values()
            .filter_map(|s| s.service.as_ref())
            .any(|s| s.system_name == system_name)
        {
            return Err(Error::rejected(
                "create service",
                format!("system name '{system_name}' has already been taken"),
            ));
        }
        let service = Service {
            id: ServiceId::new(self.next_id()),
            name: name.to_string(),
            system_name: system_name.to_string(),
        };
        self.services.insert(
            service.id,
            ServiceState {
                service: Some(service.clone()),
                ..ServiceState::default()
            },
        );
        Ok(service)
    }

    fn delete_service(&mut self, service: ServiceId) -> Result<()> {
        self.services
            .remove(&service)
            .ok_or_else(|| Error::not_found("service", service))?;
        self.plan_owner.retain(|_, owner| *owner != service);
        Ok(())
    }

    fn create_metric(&mut self, service: ServiceId, system_name: &str, unit: &str) -> Result<Metric> {
        if self
            .service(service)?
            .metrics
            .iter()
            .any(|m| m.system_name == system_name)
        {
            return Err(Error::rejected(
                "create metric",
                format!("system name '{system_name}' has already been taken"),
            ));
        }
        let metric = Metric {
            id: MetricId::new(self.next_id()),
            system_name: system_name.to_string(),
            friendly_name: system_name.to_string(),
            unit: unit.to_string(),
        };
        self.service_mut(service)?.metrics.push(metric.clone());
        Ok(metric)
    }

    fn delete_metric(&mut self, service: ServiceId, metric: MetricId) -> Result<()> {
        let state = self.service_mut(service)?;
        let before = state.metrics.len();
        state.metrics.retain(|m| m.id != metric);
        if state.metrics.len() == before {
            return Err(Error::not_found("metric", metric));
        }

        let rules_before = state.rules.len();
        state.rules.retain(|r| r.metric_id != metric);
        if state.rules.len() != rules_before {
            state.proxy.pending_changes = true;
        }
        state.limits.retain(|l| l.metric_id != metric);
        Ok(())
    }

    fn create_mapping_rule(
        &mut self,
        service: ServiceId,
        rule: &NewMappingRule,
    ) -> Result<MappingRule> {
        if !self
            .service(service)?
            .metrics
            .iter()
            .any(|m| m.id == rule.metric_id)
        {
            return Err(Error::rejected(
                "create mapping rule",
                format!("metric {} does not exist", rule.metric_id),
            ));
        }
        let created = MappingRule {
            id: MappingRuleId::new(self.next_id()),
            metric_id: rule.metric_id,
            pattern: rule.pattern.clone(),
            http_method: rule.http_method.to_ascii_uppercase(),
            delta: rule.delta,
        };
        let state = self.service_mut(service)?;
        state.rules.push(created.clone());
        state.proxy.pending_changes = true;
        Ok(created)
    }

    fn delete_mapping_rule(&mut self, service: ServiceId, rule: MappingRuleId) -> Result<()> {
        let state = self.service_mut(service)?;
        let before = state.rules.len();
        state.rules.retain(|r| r.id != rule);
        if state.rules.len() == before {
            return Err(Error::not_found("mapping rule", rule));
        }
        state.proxy.pending_changes = true;
        Ok(())
    }

    fn create_application_plan(
        &mut self,
        service: ServiceId,
        name: &str,
        plan_state: PlanState,
    ) -> Result<ApplicationPlan> {
        if self.service(service)?.plans.iter().any(|p| p.name == name) {
            return Err(Error::rejected(
                "create application plan",
                format!("name '{name}' has already been taken"),
            ));
        }
        let plan = ApplicationPlan {
            id: PlanId::new(self.next_id()),
            name: name.to_string(),
            state: plan_state.as_state().to_string(),
            default: false,
        };
        self.service_mut(service)?.plans.push(plan.clone());
        self.plan_owner.insert(plan.id, service);
        Ok(plan)
    }

    fn delete_application_plan(&mut self, service: ServiceId, plan: PlanId) -> Result<()> {
        let state = self.service_mut(service)?;
        let before = state.plans.len();
        state.plans.retain(|p| p.id != plan);
        if state.plans.len() == before {
            return Err(Error::not_found("application plan", plan));
        }
        state.limits.retain(|l| l.plan_id != Some(plan));
        self.plan_owner.remove(&plan);
        Ok(())
    }

    fn set_default_application_plan(
        &mut self,
        service: ServiceId,
        plan: PlanId,
    ) -> Result<ApplicationPlan> {
        let state = self.service_mut(service)?;
        if !state.plans.iter().any(|p| p.id == plan) {
            return Err(Error::not_found("application plan", plan));
        }
        for p in &mut state.plans {
            p.default = p.id == plan;
        }
        state
            .plans
            .iter()
            .find(|p| p.id == plan)
            .cloned()
            .ok_or_else(|| Error::not_found("application plan", plan))
    }

    fn create_plan_limit(
        &mut self,
        plan: PlanId,
        metric: MetricId,
        period: &str,
        value: i64,
    ) -> Result<Limit> {
        let service = self.plan_service(plan)?;
        let state = self.service(service)?;
        if !state.metrics.iter().any(|m| m.id == metric) {
            return Err(Error::rejected(
                "create plan limit",
                format!("metric {metric} does not exist"),
            ));
        }
        if state
            .limits
            .iter()
            .any(|l| l.plan_id == Some(plan) && l.metric_id == metric && l.period == period)
        {
            return Err(Error::rejected(
                "create plan limit",
                format!("period '{period}' has already been taken"),
            ));
        }
        let limit = Limit {
            id: LimitId::new(self.next_id()),
            metric_id: metric,
            plan_id: Some(plan),
            period: period.to_string(),
            value,
        };
        self.service_mut(service)?.limits.push(limit.clone());
        Ok(limit)
    }

    fn find_limit_mut(&mut self, plan: PlanId, metric: MetricId, limit: LimitId) -> Result<&mut Limit> {
        let service = self.plan_service(plan)?;
        self.service_mut(service)?
            .limits
            .iter_mut()
            .find(|l| l.id == limit && l.plan_id == Some(plan) && l.metric_id == metric)
            .ok_or_else(|| Error::not_found("limit", limit))
    }

    fn update_plan_limit(
        &mut self,
        plan: PlanId,
        metric: MetricId,
        limit: LimitId,
        value: i64,
    ) -> Result<Limit> {
        let found = self.find_limit_mut(plan, metric, limit)?;
        found.value = value;
        Ok(found.clone())
    }

    fn delete_plan_limit(&mut self, plan: PlanId, metric: MetricId, limit: LimitId) -> Result<()> {
        self.find_limit_mut(plan, metric, limit)?;
        let service = self.plan_service(plan)?;
        self.service_mut(service)?.limits.retain(|l| l.id != limit);
        Ok(())
    }

    fn update_proxy(&mut self, service: ServiceId, api_backend: &str) -> Result<Proxy> {
        let proxy = &mut self.service_mut(service)?.proxy;
        proxy.api_backend = Some(api_backend.to_string());
        proxy.pending_changes = false;
        proxy.sandbox_version += 1;
        Ok(Proxy {
            service_id: service,
            api_backend: proxy.api_backend.clone(),
        })
    }
}

#[async_trait]
impl SystemApi for InMemorySystem {
    async fn list_services(&self) -> Result<Vec<Service>> {
        let mut state = self.lock();
        state.begin(OperationKind::ListServices, String::new())?;
        Ok(state
            .services
            .values()
            .filter_map(|s| s.service.clone())
            .collect())
    }

    async fn create_service(&self, name: &str, system_name: &str) -> Result<Service> {
        let mut state = self.lock();
        state.begin(OperationKind::CreateService, system_name.to_string())?;
        state.create_service(name, system_name)
    }

    async fn delete_service(&self, service: ServiceId) -> Result<()> {
        let mut state = self.lock();
        let target = state
            .services
            .get(&service)
            .and_then(|s| s.service.as_ref())
            .map_or_else(|| service.to_string(), |s| s.system_name.clone());
        state.begin(OperationKind::DeleteService, target)?;
        state.delete_service(service)
    }

    async fn list_metrics(&self, service: ServiceId) -> Result<Vec<Metric>> {
        let mut state = self.lock();
        state.begin(OperationKind::ListMetrics, service.to_string())?;
        Ok(state.service(service)?.metrics.clone())
    }

    async fn create_metric(
        &self,
        service: ServiceId,
        system_name: &str,
        unit: &str,
    ) -> Result<Metric> {
        let mut state = self.lock();
        state.begin(OperationKind::CreateMetric, system_name.to_string())?;
        state.create_metric(service, system_name, unit)
    }

    async fn delete_metric(&self, service: ServiceId, metric: MetricId) -> Result<()> {
        let mut state = self.lock();
        let target = state.metric_name(service, metric);
        state.begin(OperationKind::DeleteMetric, target)?;
        state.delete_metric(service, metric)
    }

    async fn list_mapping_rules(&self, service: ServiceId) -> Result<Vec<MappingRule>> {
        let mut state = self.lock();
        state.begin(OperationKind::ListMappingRules, service.to_string())?;
        Ok(state.service(service)?.rules.clone())
    }

    async fn create_mapping_rule(
        &self,
        service: ServiceId,
        rule: &NewMappingRule,
    ) -> Result<MappingRule> {
        let mut state = self.lock();
        let target = format!("{} {}", rule.http_method.to_ascii_uppercase(), rule.pattern);
        state.begin(OperationKind::CreateMappingRule, target)?;
        state.create_mapping_rule(service, rule)
    }

    async fn delete_mapping_rule(&self, service: ServiceId, rule: MappingRuleId) -> Result<()> {
        let mut state = self.lock();
        let target = state.rule_target(service, rule);
        state.begin(OperationKind::DeleteMappingRule, target)?;
        state.delete_mapping_rule(service, rule)
    }

    async fn list_application_plans(&self, service: ServiceId) -> Result<Vec<ApplicationPlan>> {
        let mut state = self.lock();
        state.begin(OperationKind::ListApplicationPlans, service.to_string())?;
        Ok(state.service(service)?.plans.clone())
    }

    async fn create_application_plan(
        &self,
        service: ServiceId,
        name: &str,
        plan_state: PlanState,
    ) -> Result<ApplicationPlan> {
        let mut state = self.lock();
        state.begin(OperationKind::CreateApplicationPlan, name.to_string())?;
        state.create_application_plan(service, name, plan_state)
    }

    async fn delete_application_plan(&self, service: ServiceId, plan: PlanId) -> Result<()> {
        let mut state = self.lock();
        let target = state.plan_name(plan);
        state.begin(OperationKind::DeleteApplicationPlan, target)?;
        state.delete_application_plan(service, plan)
    }

    async fn set_default_application_plan(
        &self,
        service: ServiceId,
        plan: PlanId,
    ) -> Result<ApplicationPlan> {
        let mut state = self.lock();
        let target = state.plan_name(plan);
        state.begin(OperationKind::SetDefaultApplicationPlan, target)?;
        state.set_default_application_plan(service, plan)
    }

    async fn list_plan_limits(&self, plan: PlanId) -> Result<Vec<Limit>> {
        let mut state = self.lock();
        let target = state.plan_name(plan);
        state.begin(OperationKind::ListPlanLimits, target)?;
        let service = state.plan_service(plan)?;
        Ok(state
            .service(service)?
            .limits
            .iter()
            .filter(|l| l.plan_id == Some(plan))
            .cloned()
            .collect())
    }

    async fn create_plan_limit(
        &self,
        plan: PlanId,
        metric: MetricId,
        period: &str,
        value: i64,
    ) -> Result<Limit> {
        let mut state = self.lock();
        let target = state.limit_target(plan, metric, period);
        state.begin(OperationKind::CreatePlanLimit, target)?;
        state.create_plan_limit(plan, metric, period, value)
    }

    async fn update_plan_limit(
        &self,
        plan: PlanId,
        metric: MetricId,
        limit: LimitId,
        value: i64,
    ) -> Result<Limit> {
        let mut state = self.lock();
        let period = state.limit_period(plan, limit);
        let target = state.limit_target(plan, metric, &period);
        state.begin(OperationKind::UpdatePlanLimit, target)?;
        state.update_plan_limit(plan, metric, limit, value)
    }

    async fn delete_plan_limit(
        &self,
        plan: PlanId,
        metric: MetricId,
        limit: LimitId,
    ) -> Result<()> {
        let mut state = self.lock();
        let period = state.limit_period(plan, limit);
        let target = state.limit_target(plan, metric, &period);
        state.begin(OperationKind::DeletePlanLimit, target)?;
        state.delete_plan_limit(plan, metric, limit)
    }

    async fn read_proxy(&self, service: ServiceId) -> Result<Proxy> {
        let mut state = self.lock();
        state.begin(OperationKind::ReadProxy, service.to_string())?;
        Ok(Proxy {
            service_id: service,
            api_backend: state.service(service)?.proxy.api_backend.clone(),
        })
    }

    async fn update_proxy(&self, service: ServiceId, api_backend: &str) -> Result<Proxy> {
        let mut state = self.lock();
        state.begin(OperationKind::UpdateProxy, service.to_string())?;
        state.update_proxy(service, api_backend)
    }

    async fn latest_proxy_config(
        &self,
        service: ServiceId,
        environment: Environment,
    ) -> Result<Option<ProxyConfig>> {
        let mut state = self.lock();
        state.begin(OperationKind::LatestProxyConfig, format!("{service}/{environment}"))?;
        let proxy = &state.service(service)?.proxy;
        let version = match environment {
            Environment::Sandbox => Some(proxy.sandbox_version).filter(|v| *v > 0),
            Environment::Production => proxy.production_version,
        };
        Ok(version.map(|version| ProxyConfig {
            version,
            environment,
        }))
    }

    async fn promote_proxy_config(&self, service: ServiceId, version: u64) -> Result<ProxyConfig> {
        let mut state = self.lock();
        state.begin(OperationKind::PromoteProxyConfig, format!("{service}/{version}"))?;
        let proxy = &mut state.service_mut(service)?.proxy;
        if version == 0 || version != proxy.sandbox_version {
            return Err(Error::not_found("sandbox proxy config", version));
        }
        proxy.production_version = Some(version);
        Ok(ProxyConfig {
            version,
            environment: Environment::Production,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_sequential_and_journaled() -> Result<()> {
        let system = InMemorySystem::new();
        let service = system.create_service("Widgets", "widgets").await?;
        let hits = system.create_metric(service.id, "hits", "hits").await?;

        assert!(hits.id.get() > service.id.get());
        assert_eq!(system.journal().len(), 2);
        assert_eq!(system.mutations().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_metric_is_rejected() -> Result<()> {
        let system = InMemorySystem::new();
        let service = system.seed_service("widgets")?;
        system.seed_metric(service.id, "hits")?;

        let result = system.create_metric(service.id, "hits", "hits").await;
        assert!(matches!(result, Err(Error::Rejected { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_mapping_rule_requires_metric() -> Result<()> {
        let system = InMemorySystem::new();
        let service = system.seed_service("widgets")?;
        let rule = NewMappingRule {
            pattern: "/widgets".to_string(),
            http_method: "GET".to_string(),
            metric_id: MetricId::new(999),
            delta: 1,
        };

        let result = system.create_mapping_rule(service.id, &rule).await;
        assert!(matches!(result, Err(Error::Rejected { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_deleting_metric_cascades() -> Result<()> {
        let system = InMemorySystem::new();
        let service = system.seed_service("widgets")?;
        let hits = system.seed_metric(service.id, "hits")?;
        let plan = system.seed_plan(service.id, "basic")?;
        system.seed_mapping_rule(service.id, "GET", "/widgets", hits.id, 1)?;
        system.seed_limit(plan.id, hits.id, "month", 100)?;

        system.delete_metric(service.id, hits.id).await?;

        assert!(system.list_mapping_rules(service.id).await?.is_empty());
        assert!(system.list_plan_limits(plan.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_limit_is_unique_per_metric_and_period() -> Result<()> {
        let system = InMemorySystem::new();
        let service = system.seed_service("widgets")?;
        let hits = system.seed_metric(service.id, "hits")?;
        let plan = system.seed_plan(service.id, "basic")?;
        system.seed_limit(plan.id, hits.id, "month", 100)?;

        let result = system.create_plan_limit(plan.id, hits.id, "month", 5).await;
        assert!(matches!(result, Err(Error::Rejected { .. })));

        let ops = system.operations(OperationKind::CreatePlanLimit);
        assert_eq!(ops.first().map(|op| op.target.as_str()), Some("basic/hits/month"));
        Ok(())
    }

    #[tokio::test]
    async fn test_injected_failure_matches_target() -> Result<()> {
        let system = InMemorySystem::new();
        let service = system.seed_service("widgets")?;
        system.fail_on_target(OperationKind::CreateMetric, "writes");

        assert!(system.create_metric(service.id, "hits", "hits").await.is_ok());
        let result = system.create_metric(service.id, "writes", "hits").await;
        assert!(result.is_err_and(|e| e.is_retryable()));

        system.clear_failures();
        assert!(system.create_metric(service.id, "writes", "hits").await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_default_plan_is_exclusive() -> Result<()> {
        let system = InMemorySystem::new();
        let service = system.seed_service("widgets")?;
        let basic = system.seed_plan(service.id, "basic")?;
        let pro = system.seed_plan(service.id, "pro")?;

        system.set_default_application_plan(service.id, basic.id).await?;
        system.set_default_application_plan(service.id, pro.id).await?;

        let plans = system.list_application_plans(service.id).await?;
        let defaults: Vec<_> = plans.iter().filter(|p| p.default).map(|p| p.name.as_str()).collect();
        assert_eq!(defaults, vec!["pro"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_proxy_versions() -> Result<()> {
        let system = InMemorySystem::new();
        let service = system.seed_service("widgets")?;

        assert_eq!(system.latest_proxy_config(service.id, Environment::Sandbox).await?, None);

        system.update_proxy(service.id, "http://widgets.internal").await?;
        let sandbox = system.latest_proxy_config(service.id, Environment::Sandbox).await?;
        assert_eq!(sandbox.as_ref().map(|c| c.version), Some(1));
        assert!(system.promote_proxy_config(service.id, 2).await.is_err());

        system.promote_proxy_config(service.id, 1).await?;
        let status = system.proxy_status(service.id);
        assert_eq!(status.and_then(|s| s.production_version), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_mapping_rule_changes_mark_proxy_pending() -> Result<()> {
        let system = InMemorySystem::new();
        let service = system.seed_service("widgets")?;
        let hits = system.seed_metric(service.id, "hits")?;
        system.seed_proxy(service.id, "http://widgets.internal")?;
        assert_eq!(system.proxy_status(service.id).map(|s| s.pending_changes), Some(false));

        system.seed_mapping_rule(service.id, "get", "/widgets", hits.id, 1)?;

        let status = system.proxy_status(service.id);
        assert_eq!(status.map(|s| s.pending_changes), Some(true));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_service_removes_plans() -> Result<()> {
        let system = InMemorySystem::new();
        let service = system.seed_service("widgets")?;
        let plan = system.seed_plan(service.id, "basic")?;

        system.delete_service(service.id).await?;

        assert!(system.list_services().await?.is_empty());
        assert!(system.list_plan_limits(plan.id).await.is_err_and(|e| e.is_not_found()));
        Ok(())
    }
}
