//! API definition loader.
//!
//! Reads an OpenAPI document (YAML or JSON) and extracts the desired state
//! from its vendor extensions:
//!
//! ```yaml
//! x-3scale-upstream: http://widgets.internal:8080
//! x-3scale-plans:
//!   - name: basic
//!     default: true
//!     limits:
//!       - { metric: hits, period: month, max: 100 }
//! paths:
//!   /widgets:
//!     get:
//!       x-3scale-metrics:
//!         - { metric: hits, increment: 1 }
//! ```

use std::path::Path;

use serde_yaml::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{DesiredState, Endpoint, Endpoints, MetricUsage, OperationId, Plan, Plans};

/// Operation keys recognised on an OpenAPI path item.
pub const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

pub const METRICS_EXTENSION: &str = "x-3scale-metrics";
pub const PLANS_EXTENSION: &str = "x-3scale-plans";
pub const UPSTREAM_EXTENSION: &str = "x-3scale-upstream";

/// Desired state extracted from an API definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiDefinition {
    /// `info.title`, if present.
    pub title: Option<String>,
    pub endpoints: Endpoints,
    pub plans: Plans,
    pub upstream: Option<String>,
}

impl ApiDefinition {
    /// Load a definition from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_yaml_str(&contents)
    }

    /// Parse a definition from YAML (or JSON, which is valid YAML).
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let doc: Value =
            serde_yaml::from_str(contents).map_err(|e| Error::yaml_parse_failed(e.to_string()))?;

        if !doc.is_mapping() {
            return Err(Error::invalid_definition("document root must be a mapping"));
        }

        let title = doc
            .get("info")
            .and_then(|info| info.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let upstream = doc
            .get(UPSTREAM_EXTENSION)
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            title,
            endpoints: parse_endpoints(doc.get("paths"))?,
            plans: parse_plans(doc.get(PLANS_EXTENSION))?,
            upstream,
        })
    }

    /// Convert into the desired state of a reconciliation pass.
    pub fn into_desired_state(self) -> DesiredState {
        DesiredState {
            endpoints: self.endpoints,
            plans: self.plans,
            upstream: self.upstream,
        }
    }
}

fn parse_endpoints(paths: Option<&Value>) -> Result<Endpoints> {
    let Some(paths) = paths.filter(|v| !v.is_null()) else {
        return Ok(Endpoints::new());
    };
    let paths = paths
        .as_mapping()
        .ok_or_else(|| Error::invalid_definition("'paths' must be a mapping"))?;

    let mut endpoints = Endpoints::new();
    for (key, item) in paths {
        let path = key
            .as_str()
            .ok_or_else(|| Error::invalid_definition("path keys must be strings"))?;

        let mut endpoint = Endpoint::new(path);
        for method in HTTP_METHODS {
            let Some(operation) = item.get(method) else {
                continue;
            };
            let op = OperationId {
                metrics: parse_metrics(operation.get(METRICS_EXTENSION), method, path)?,
                ..OperationId::new(method, path)
            };
            // An operation without metric usages produces no mapping rules.
            if op.metrics.is_empty() {
                debug!(path, method, "Skipping operation without metrics");
                continue;
            }
            endpoint.operations.push(op);
        }

        if !endpoint.operations.is_empty() {
            endpoints.push(endpoint);
        }
    }

    Ok(endpoints)
}

fn parse_metrics(value: Option<&Value>, method: &str, path: &str) -> Result<Vec<MetricUsage>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_yaml::from_value(value.clone()).map_err(|e| {
            Error::invalid_extension(
                METRICS_EXTENSION,
                format!("{} {path}", method.to_ascii_uppercase()),
                e.to_string(),
            )
        }),
    }
}

fn parse_plans(value: Option<&Value>) -> Result<Plans> {
    let list = match value {
        None | Some(Value::Null) => return Ok(Plans::new()),
        Some(Value::Mapping(mapping)) => mapping
            .get("plans")
            .cloned()
            .ok_or_else(|| Error::invalid_extension(PLANS_EXTENSION, "root", "missing 'plans'"))?,
        Some(other) => other.clone(),
    };

    let plans: Vec<Plan> = serde_yaml::from_value(list)
        .map_err(|e| Error::invalid_extension(PLANS_EXTENSION, "root", e.to_string()))?;
    Ok(Plans { plans })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const DEFINITION: &str = r"
openapi: 3.0.0
info:
  title: Widgets
x-3scale-upstream: http://widgets.internal:8080
x-3scale-plans:
  - name: basic
    default: true
    limits:
      - metric: hits
        period: month
        max: 100
      - metric: hits
        period: minute
        max: 10
  - name: pro
paths:
  /widgets:
    parameters: []
    get:
      x-3scale-metrics:
        - metric: hits
          increment: 1
    post:
      x-3scale-metrics:
        - metric: hits
        - metric: writes
          increment: 5
  /health:
    get:
      summary: not metered
";

    #[test]
    fn test_parses_endpoints_from_paths() {
        let def = ApiDefinition::from_yaml_str(DEFINITION).unwrap();

        assert_eq!(def.title.as_deref(), Some("Widgets"));
        assert_eq!(def.endpoints.len(), 1);
        let widgets = def.endpoints.get("/widgets").unwrap();
        assert_eq!(widgets.operations.len(), 2);
        assert!(widgets.operations.iter().any(|op| op.name == "GET-/widgets"));

        let post = widgets.operations.iter().find(|op| op.method == "POST").unwrap();
        assert_eq!(post.metrics, vec![MetricUsage::new("hits", 1), MetricUsage::new("writes", 5)]);
    }

    #[test]
    fn test_parses_plans_and_upstream() {
        let def = ApiDefinition::from_yaml_str(DEFINITION).unwrap();

        assert_eq!(def.upstream.as_deref(), Some("http://widgets.internal:8080"));
        assert_eq!(def.plans.len(), 2);
        let basic = def.plans.get("basic").unwrap();
        assert!(basic.default);
        assert_eq!(basic.limits.len(), 2);
        assert!(def.plans.get("pro").unwrap().limits.is_empty());
    }

    #[test]
    fn test_accepts_wrapped_plans_and_json() {
        let json = r#"{
            "paths": {"/a": {"GET": {"x-3scale-metrics": [{"metric": "hits", "increment": 2}]}}},
            "x-3scale-plans": {"plans": [{"name": "free"}]}
        }"#;
        let def = ApiDefinition::from_yaml_str(json).unwrap();

        assert!(def.plans.contains("free"));
        // Upper-case operation keys are not OpenAPI operations.
        assert!(def.endpoints.is_empty());
    }

    #[test]
    fn test_missing_paths_yields_no_endpoints() {
        let def = ApiDefinition::from_yaml_str("openapi: 3.0.0\n").unwrap();
        assert!(def.into_desired_state().is_empty());
    }

    #[test]
    fn test_rejects_non_mapping_paths() {
        let result = ApiDefinition::from_yaml_str("paths: [1, 2]\n");
        assert!(matches!(result, Err(Error::InvalidDefinition { .. })));
    }

    #[test]
    fn test_rejects_malformed_metrics_extension() {
        let yaml = "paths:\n  /a:\n    get:\n      x-3scale-metrics: hits\n";
        let result = ApiDefinition::from_yaml_str(yaml);
        assert!(matches!(result, Err(Error::InvalidExtension { .. })));
    }

    #[test]
    fn test_from_path_reports_missing_file() {
        let result = ApiDefinition::from_path("/nonexistent/definition.yaml");
        assert!(matches!(result, Err(Error::FileReadFailed { .. })));
    }

    #[test]
    fn test_from_path_reads_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("api.yaml");
        std::fs::write(&file, DEFINITION)?;

        let def = ApiDefinition::from_path(&file)?;
        assert_eq!(def.endpoints.operation_count(), 2);
        Ok(())
    }
}
