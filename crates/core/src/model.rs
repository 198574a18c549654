//! Desired-state model.
//!
//! This represents what the backend should look like for one service:
//! endpoints (path -> operations -> metric usages) and plans (name -> limits).
//! Values are built once per pass by the definition loader and never mutated
//! by the reconciler.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Build the name of an operation from its method and path.
///
/// Operations are not separately named by the definition format, so the
/// name is always `METHOD-path`.
pub fn operation_name(method: &str, path: &str) -> String {
    format!("{method}-{path}")
}

/// Normalize an HTTP method to the form the backend stores.
pub fn normalize_method(method: &str) -> String {
    method.trim().to_ascii_uppercase()
}

/// A metric charged by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricUsage {
    /// Metric system name.
    pub metric: String,
    /// Amount the metric is incremented by per request.
    #[serde(default = "default_increment")]
    pub increment: i64,
}

const fn default_increment() -> i64 {
    1
}

impl MetricUsage {
    /// Create a new metric usage.
    pub fn new(metric: impl Into<String>, increment: i64) -> Self {
        Self {
            metric: metric.into(),
            increment,
        }
    }
}

/// An HTTP operation on an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationId {
    /// `METHOD-path`.
    pub name: String,
    /// Upper-case HTTP verb.
    pub method: String,
    /// Metrics charged by this operation; each entry becomes one mapping rule.
    #[serde(default)]
    pub metrics: Vec<MetricUsage>,
}

impl OperationId {
    /// Create an operation for `method` on `path` with no metrics.
    pub fn new(method: &str, path: &str) -> Self {
        let method = normalize_method(method);
        Self {
            name: operation_name(&method, path),
            method,
            metrics: Vec::new(),
        }
    }

    /// Add a metric usage.
    #[must_use]
    pub fn with_metric(mut self, metric: impl Into<String>, increment: i64) -> Self {
        self.metrics.push(MetricUsage::new(metric, increment));
        self
    }
}

/// A path and the operations defined on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Path pattern, used verbatim as the mapping-rule pattern.
    pub path: String,
    /// Operations on this path.
    #[serde(rename = "operationIDs", default)]
    pub operations: Vec<OperationId>,
}

impl Endpoint {
    /// Create an endpoint with no operations.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operations: Vec::new(),
        }
    }

    /// Add an operation.
    #[must_use]
    pub fn with_operation(mut self, operation: OperationId) -> Self {
        self.operations.push(operation);
        self
    }

    /// Check whether this endpoint defines an operation with `method`.
    pub fn has_method(&self, method: &str) -> bool {
        self.operations.iter().any(|op| op.method == method)
    }
}

/// One desired `(path, method, metric, increment)` binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteUsage<'a> {
    pub path: &'a str,
    pub method: &'a str,
    pub metric: &'a str,
    pub increment: i64,
}

/// The desired endpoints of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoints {
    pub endpoints: Vec<Endpoint>,
}

impl Endpoints {
    /// Create an empty endpoint collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Add an endpoint in place.
    pub fn push(&mut self, endpoint: Endpoint) {
        self.endpoints.push(endpoint);
    }

    /// Iterate over endpoints.
    pub fn iter(&self) -> std::slice::Iter<'_, Endpoint> {
        self.endpoints.iter()
    }

    /// Find the endpoint for `path`.
    pub fn get(&self, path: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|ep| ep.path == path)
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Check if there are no endpoints.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Every `(path, method, metric, increment)` binding, in definition order.
    pub fn usages(&self) -> impl Iterator<Item = RouteUsage<'_>> {
        self.endpoints.iter().flat_map(|ep| {
            ep.operations.iter().flat_map(move |op| {
                op.metrics.iter().map(move |usage| RouteUsage {
                    path: &ep.path,
                    method: &op.method,
                    metric: &usage.metric,
                    increment: usage.increment,
                })
            })
        })
    }

    /// Distinct metric system names referenced by any operation.
    pub fn metric_names(&self) -> BTreeSet<&str> {
        self.usages().map(|usage| usage.metric).collect()
    }

    /// Check whether any endpoint on `path` defines `method`.
    pub fn has_route(&self, path: &str, method: &str) -> bool {
        self.endpoints
            .iter()
            .any(|ep| ep.path == path && ep.has_method(method))
    }

    /// Total number of operations across all endpoints.
    pub fn operation_count(&self) -> usize {
        self.endpoints.iter().map(|ep| ep.operations.len()).sum()
    }
}

impl FromIterator<Endpoint> for Endpoints {
    fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
        Self {
            endpoints: iter.into_iter().collect(),
        }
    }
}

/// A cap on a metric's usage within a period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Limit {
    /// Metric system name.
    pub metric: String,
    /// Period such as `minute`, `day` or `month`.
    pub period: String,
    /// Maximum usage in the period.
    pub max: i64,
}

impl Limit {
    /// Create a new limit.
    pub fn new(metric: impl Into<String>, period: impl Into<String>, max: i64) -> Self {
        Self {
            metric: metric.into(),
            period: period.into(),
            max,
        }
    }
}

/// A named bundle of limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub limits: Vec<Limit>,
}

impl Plan {
    /// Create a plan with no limits.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: false,
            limits: Vec::new(),
        }
    }

    /// Add a limit.
    #[must_use]
    pub fn with_limit(mut self, metric: impl Into<String>, period: impl Into<String>, max: i64) -> Self {
        self.limits.push(Limit::new(metric, period, max));
        self
    }

    /// Mark the plan as the service default.
    #[must_use]
    pub const fn as_default(mut self) -> Self {
        self.default = true;
        self
    }
}

/// The desired plans of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plans {
    pub plans: Vec<Plan>,
}

impl Plans {
    /// Create an empty plan collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plan.
    #[must_use]
    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plans.push(plan);
        self
    }

    /// Iterate over plans.
    pub fn iter(&self) -> std::slice::Iter<'_, Plan> {
        self.plans.iter()
    }

    /// Find a plan by name.
    pub fn get(&self, name: &str) -> Option<&Plan> {
        self.plans.iter().find(|plan| plan.name == name)
    }

    /// Check whether a plan with `name` is desired.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of plans.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Check if there are no plans.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl FromIterator<Plan> for Plans {
    fn from_iter<I: IntoIterator<Item = Plan>>(iter: I) -> Self {
        Self {
            plans: iter.into_iter().collect(),
        }
    }
}

/// Desired state declaration for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub endpoints: Endpoints,
    pub plans: Plans,
    /// API backend the gateway proxies to, when managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

impl DesiredState {
    /// Create a new empty desired state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a desired state from endpoints and plans.
    pub const fn from_parts(endpoints: Endpoints, plans: Plans) -> Self {
        Self {
            endpoints,
            plans,
            upstream: None,
        }
    }

    /// Set the upstream.
    #[must_use]
    pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.upstream = Some(upstream.into());
        self
    }

    /// Check if nothing is desired.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty() && self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widgets() -> Endpoints {
        Endpoints::new()
            .with_endpoint(
                Endpoint::new("/widgets")
                    .with_operation(OperationId::new("get", "/widgets").with_metric("hits", 1))
                    .with_operation(
                        OperationId::new("POST", "/widgets")
                            .with_metric("hits", 1)
                            .with_metric("writes", 5),
                    ),
            )
            .with_endpoint(
                Endpoint::new("/gadgets")
                    .with_operation(OperationId::new("delete", "/gadgets").with_metric("hits", 2)),
            )
    }

    #[test]
    fn test_operation_name_uses_normalized_method() {
        let op = OperationId::new("get", "/widgets");
        assert_eq!(op.method, "GET");
        assert_eq!(op.name, "GET-/widgets");
    }

    #[test]
    fn test_metric_names_are_distinct() {
        let binding = widgets();
        let names: Vec<&str> = binding.metric_names().into_iter().collect();
        assert_eq!(names, vec!["hits", "writes"]);
    }

    #[test]
    fn test_usages_flatten_every_binding() {
        let endpoints = widgets();
        assert_eq!(endpoints.usages().count(), 4);
        assert!(endpoints.usages().any(|u| u.path == "/gadgets"
            && u.method == "DELETE"
            && u.metric == "hits"
            && u.increment == 2));
    }

    #[test]
    fn test_has_route() {
        let endpoints = widgets();
        assert!(endpoints.has_route("/widgets", "POST"));
        assert!(!endpoints.has_route("/widgets", "DELETE"));
        assert!(!endpoints.has_route("/missing", "GET"));
    }

    #[test]
    fn test_metric_usage_increment_defaults_to_one() {
        let usage: std::result::Result<MetricUsage, _> =
            serde_json::from_str(r#"{"metric":"hits"}"#);
        assert_eq!(usage.ok().map(|u| u.increment), Some(1));
    }

    #[test]
    fn test_plans_lookup() {
        let plans = Plans::new()
            .with_plan(Plan::new("basic").with_limit("hits", "month", 100))
            .with_plan(Plan::new("pro").as_default());

        assert!(plans.contains("basic"));
        assert!(!plans.contains("enterprise"));
        assert_eq!(plans.get("pro").map(|p| p.default), Some(true));
    }

    #[test]
    fn test_plan_deserializes_without_optional_fields() {
        let plan: std::result::Result<Plan, _> = serde_json::from_str(r#"{"name":"basic"}"#);
        let plan = plan.ok();
        assert_eq!(plan.as_ref().map(|p| p.default), Some(false));
        assert_eq!(plan.map(|p| p.limits.len()), Some(0));
    }
}
