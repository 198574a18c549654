//! HTTP client for the 3scale account-management admin API.
//!
//! All calls go to the JSON flavour of the admin API. Every entity is
//! wrapped in an envelope named after it (`{"metric": {...}}`) and lists
//! wrap each element the same way (`{"metrics": [{"metric": {...}}]}`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::api::SystemApi;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::types::{
    ApplicationPlan, Environment, Limit, LimitId, MappingRule, MappingRuleId, Metric, MetricId,
    NewMappingRule, PlanId, PlanState, Proxy, ProxyConfig, Service, ServiceId,
};

type Params = Vec<(&'static str, String)>;

/// Client for a single 3scale admin portal.
#[derive(Debug, Clone)]
pub struct ThreeScaleClient {
    config: Arc<ClientConfig>,
    http_client: reqwest::Client,
}

impl ThreeScaleClient {
    /// Create a client from a validated configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            http_client,
        })
    }

    /// Create a client from `OSTIA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// The admin portal this client talks to.
    pub fn portal_url(&self) -> &Url {
        &self.config.portal_url
    }

    /// Issue a request, retrying idempotent verbs with exponential backoff.
    async fn call(
        &self,
        method: Method,
        operation: &str,
        path: &str,
        params: Params,
    ) -> Result<Value> {
        let url = self.config.portal_url.join(path)?;
        let idempotent = matches!(method, Method::GET | Method::PUT | Method::DELETE);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.send_once(method.clone(), operation, &url, &params).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    if !idempotent || attempt > self.config.max_retries || !e.is_retryable() {
                        return Err(e);
                    }

                    let delay = backoff(self.config.retry_delay, attempt);
                    info!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying after error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Execute a single request attempt.
    async fn send_once(
        &self,
        method: Method,
        operation: &str,
        url: &Url,
        params: &Params,
    ) -> Result<Value> {
        debug!(operation, %method, path = url.path(), "Sending request");

        let has_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);
        let request = self
            .http_client
            .request(method, url.as_ref())
            .query(&[("access_token", self.config.access_token.as_str())]);
        let request = if has_body {
            request.form(params)
        } else {
            request.query(params)
        };

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::not_found(operation, url.path()));
        }

        let body = response.text().await?;

        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            return Err(Error::rejected(operation, body));
        }
        if !status.is_success() {
            return Err(Error::unexpected_status(operation, status.as_u16(), body));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| Error::decode(operation, e.to_string()))
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

/// Decode `{"<key>": {...}}`.
fn entity<T: DeserializeOwned>(operation: &str, mut body: Value, key: &str) -> Result<T> {
    let inner = body
        .get_mut(key)
        .map(Value::take)
        .ok_or_else(|| Error::decode(operation, format!("missing '{key}'")))?;
    serde_json::from_value(inner).map_err(|e| Error::decode(operation, e.to_string()))
}

/// Decode `{"<list_key>": [{"<item_key>": {...}}, ...]}`.
fn entities<T: DeserializeOwned>(
    operation: &str,
    mut body: Value,
    list_key: &str,
    item_key: &str,
) -> Result<Vec<T>> {
    match body.get_mut(list_key).map(Value::take) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| entity(operation, item, item_key))
            .collect(),
        Some(_) => Err(Error::decode(operation, format!("'{list_key}' is not a list"))),
    }
}

#[async_trait]
impl SystemApi for ThreeScaleClient {
    async fn list_services(&self) -> Result<Vec<Service>> {
        const OP: &str = "list services";
        let body = self
            .call(Method::GET, OP, "/admin/api/services.json", Vec::new())
            .await?;
        entities(OP, body, "services", "service")
    }

    async fn create_service(&self, name: &str, system_name: &str) -> Result<Service> {
        const OP: &str = "create service";
        let params = vec![("name", name.to_string()), ("system_name", system_name.to_string())];
        let body = self
            .call(Method::POST, OP, "/admin/api/services.json", params)
            .await?;
        entity(OP, body, "service")
    }

    async fn delete_service(&self, service: ServiceId) -> Result<()> {
        let path = format!("/admin/api/services/{service}.json");
        self.call(Method::DELETE, "delete service", &path, Vec::new())
            .await
            .map(drop)
    }

    async fn list_metrics(&self, service: ServiceId) -> Result<Vec<Metric>> {
        const OP: &str = "list metrics";
        let path = format!("/admin/api/services/{service}/metrics.json");
        let body = self.call(Method::GET, OP, &path, Vec::new()).await?;
        entities(OP, body, "metrics", "metric")
    }

    async fn create_metric(
        &self,
        service: ServiceId,
        system_name: &str,
        unit: &str,
    ) -> Result<Metric> {
        const OP: &str = "create metric";
        let path = format!("/admin/api/services/{service}/metrics.json");
        let params = vec![
            ("friendly_name", system_name.to_string()),
            ("system_name", system_name.to_string()),
            ("unit", unit.to_string()),
        ];
        let body = self.call(Method::POST, OP, &path, params).await?;
        entity(OP, body, "metric")
    }

    async fn delete_metric(&self, service: ServiceId, metric: MetricId) -> Result<()> {
        let path = format!("/admin/api/services/{service}/metrics/{metric}.json");
        self.call(Method::DELETE, "delete metric", &path, Vec::new())
            .await
            .map(drop)
    }

    async fn list_mapping_rules(&self, service: ServiceId) -> Result<Vec<MappingRule>> {
        const OP: &str = "list mapping rules";
        let path = format!("/admin/api/services/{service}/proxy/mapping_rules.json");
        let body = self.call(Method::GET, OP, &path, Vec::new()).await?;
        entities(OP, body, "mapping_rules", "mapping_rule")
    }

    async fn create_mapping_rule(
        &self,
        service: ServiceId,
        rule: &NewMappingRule,
    ) -> Result<MappingRule> {
        const OP: &str = "create mapping rule";
        let path = format!("/admin/api/services/{service}/proxy/mapping_rules.json");
        let params = vec![
            ("http_method", rule.http_method.clone()),
            ("pattern", rule.pattern.clone()),
            ("delta", rule.delta.to_string()),
            ("metric_id", rule.metric_id.to_string()),
        ];
        let body = self.call(Method::POST, OP, &path, params).await?;
        entity(OP, body, "mapping_rule")
    }

    async fn delete_mapping_rule(&self, service: ServiceId, rule: MappingRuleId) -> Result<()> {
        let path = format!("/admin/api/services/{service}/proxy/mapping_rules/{rule}.json");
        self.call(Method::DELETE, "delete mapping rule", &path, Vec::new())
            .await
            .map(drop)
    }

    async fn list_application_plans(&self, service: ServiceId) -> Result<Vec<ApplicationPlan>> {
        const OP: &str = "list application plans";
        let path = format!("/admin/api/services/{service}/application_plans.json");
        let body = self.call(Method::GET, OP, &path, Vec::new()).await?;
        entities(OP, body, "plans", "application_plan")
    }

    async fn create_application_plan(
        &self,
        service: ServiceId,
        name: &str,
        state: PlanState,
    ) -> Result<ApplicationPlan> {
        const OP: &str = "create application plan";
        let path = format!("/admin/api/services/{service}/application_plans.json");
        let params = vec![
            ("name", name.to_string()),
            ("state_event", state.as_event().to_string()),
        ];
        let body = self.call(Method::POST, OP, &path, params).await?;
        entity(OP, body, "application_plan")
    }

    async fn delete_application_plan(&self, service: ServiceId, plan: PlanId) -> Result<()> {
        let path = format!("/admin/api/services/{service}/application_plans/{plan}.json");
        self.call(Method::DELETE, "delete application plan", &path, Vec::new())
            .await
            .map(drop)
    }

    async fn set_default_application_plan(
        &self,
        service: ServiceId,
        plan: PlanId,
    ) -> Result<ApplicationPlan> {
        const OP: &str = "set default application plan";
        let path = format!("/admin/api/services/{service}/application_plans/{plan}/default.json");
        let body = self.call(Method::PUT, OP, &path, Vec::new()).await?;
        entity(OP, body, "application_plan")
    }

    async fn list_plan_limits(&self, plan: PlanId) -> Result<Vec<Limit>> {
        const OP: &str = "list plan limits";
        let path = format!("/admin/api/application_plans/{plan}/limits.json");
        let body = self.call(Method::GET, OP, &path, Vec::new()).await?;
        entities(OP, body, "limits", "limit")
    }

    async fn create_plan_limit(
        &self,
        plan: PlanId,
        metric: MetricId,
        period: &str,
        value: i64,
    ) -> Result<Limit> {
        const OP: &str = "create plan limit";
        let path = format!("/admin/api/application_plans/{plan}/metrics/{metric}/limits.json");
        let params = vec![("period", period.to_string()), ("value", value.to_string())];
        let body = self.call(Method::POST, OP, &path, params).await?;
        entity(OP, body, "limit")
    }

    async fn update_plan_limit(
        &self,
        plan: PlanId,
        metric: MetricId,
        limit: LimitId,
        value: i64,
    ) -> Result<Limit> {
        const OP: &str = "update plan limit";
        let path =
            format!("/admin/api/application_plans/{plan}/metrics/{metric}/limits/{limit}.json");
        let params = vec![("value", value.to_string())];
        let body = self.call(Method::PUT, OP, &path, params).await?;
        entity(OP, body, "limit")
    }

    async fn delete_plan_limit(
        &self,
        plan: PlanId,
        metric: MetricId,
        limit: LimitId,
    ) -> Result<()> {
        let path =
            format!("/admin/api/application_plans/{plan}/metrics/{metric}/limits/{limit}.json");
        self.call(Method::DELETE, "delete plan limit", &path, Vec::new())
            .await
            .map(drop)
    }

    async fn read_proxy(&self, service: ServiceId) -> Result<Proxy> {
        const OP: &str = "read proxy";
        let path = format!("/admin/api/services/{service}/proxy.json");
        let body = self.call(Method::GET, OP, &path, Vec::new()).await?;
        entity(OP, body, "proxy")
    }

    async fn update_proxy(&self, service: ServiceId, api_backend: &str) -> Result<Proxy> {
        const OP: &str = "update proxy";
        let path = format!("/admin/api/services/{service}/proxy.json");
        let params = vec![("api_backend", api_backend.to_string())];
        let body = self.call(Method::PATCH, OP, &path, params).await?;
        entity(OP, body, "proxy")
    }

    async fn latest_proxy_config(
        &self,
        service: ServiceId,
        environment: Environment,
    ) -> Result<Option<ProxyConfig>> {
        const OP: &str = "read latest proxy config";
        let path = format!("/admin/api/services/{service}/proxy/configs/{environment}/latest.json");
        match self.call(Method::GET, OP, &path, Vec::new()).await {
            Ok(body) => entity(OP, body, "proxy_config").map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn promote_proxy_config(&self, service: ServiceId, version: u64) -> Result<ProxyConfig> {
        const OP: &str = "promote proxy config";
        let path = format!(
            "/admin/api/services/{service}/proxy/configs/{}/{version}/promote.json",
            Environment::Sandbox
        );
        let params = vec![("to", Environment::Production.to_string())];
        let body = self.call(Method::POST, OP, &path, params).await?;
        entity(OP, body, "proxy_config")
    }
}
