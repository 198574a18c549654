//! The accessor/mutator surface of the account-management backend.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    ApplicationPlan, Environment, Limit, LimitId, MappingRule, MappingRuleId, Metric, MetricId,
    NewMappingRule, PlanId, PlanState, Proxy, ProxyConfig, Service, ServiceId,
};

/// Service-scoped operations against the account-management backend.
///
/// Every call is a single request/response exchange; implementations never
/// cache remote state between calls.
#[async_trait]
pub trait SystemApi: Send + Sync {
    // Services

    async fn list_services(&self) -> Result<Vec<Service>>;

    async fn create_service(&self, name: &str, system_name: &str) -> Result<Service>;

    async fn delete_service(&self, service: ServiceId) -> Result<()>;

    // Metrics

    async fn list_metrics(&self, service: ServiceId) -> Result<Vec<Metric>>;

    async fn create_metric(&self, service: ServiceId, system_name: &str, unit: &str)
    -> Result<Metric>;

    /// Deleting a metric also removes the mapping rules and limits that
    /// reference it.
    async fn delete_metric(&self, service: ServiceId, metric: MetricId) -> Result<()>;

    // Mapping rules

    async fn list_mapping_rules(&self, service: ServiceId) -> Result<Vec<MappingRule>>;

    async fn create_mapping_rule(
        &self,
        service: ServiceId,
        rule: &NewMappingRule,
    ) -> Result<MappingRule>;

    async fn delete_mapping_rule(&self, service: ServiceId, rule: MappingRuleId) -> Result<()>;

    // Application plans

    async fn list_application_plans(&self, service: ServiceId) -> Result<Vec<ApplicationPlan>>;

    async fn create_application_plan(
        &self,
        service: ServiceId,
        name: &str,
        state: PlanState,
    ) -> Result<ApplicationPlan>;

    async fn delete_application_plan(&self, service: ServiceId, plan: PlanId) -> Result<()>;

    /// Make `plan` the default plan of the service.
    async fn set_default_application_plan(
        &self,
        service: ServiceId,
        plan: PlanId,
    ) -> Result<ApplicationPlan>;

    // Plan limits

    async fn list_plan_limits(&self, plan: PlanId) -> Result<Vec<Limit>>;

    async fn create_plan_limit(
        &self,
        plan: PlanId,
        metric: MetricId,
        period: &str,
        value: i64,
    ) -> Result<Limit>;

    async fn update_plan_limit(
        &self,
        plan: PlanId,
        metric: MetricId,
        limit: LimitId,
        value: i64,
    ) -> Result<Limit>;

    async fn delete_plan_limit(&self, plan: PlanId, metric: MetricId, limit: LimitId)
    -> Result<()>;

    // Gateway proxy

    async fn read_proxy(&self, service: ServiceId) -> Result<Proxy>;

    async fn update_proxy(&self, service: ServiceId, api_backend: &str) -> Result<Proxy>;

    /// Latest configuration deployed to `environment`, or `None` when the
    /// environment has never been deployed.
    async fn latest_proxy_config(
        &self,
        service: ServiceId,
        environment: Environment,
    ) -> Result<Option<ProxyConfig>>;

    /// Promote sandbox configuration `version` to production.
    async fn promote_proxy_config(&self, service: ServiceId, version: u64) -> Result<ProxyConfig>;
}
