//! Remote entity types.
//!
//! Every entity belongs to exactly one service and is identified by a
//! backend-assigned ID.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! remote_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Wrap a backend-assigned ID.
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the raw ID.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

remote_id!(
    /// Service ID.
    ServiceId
);
remote_id!(
    /// Metric ID.
    MetricId
);
remote_id!(
    /// Mapping rule ID.
    MappingRuleId
);
remote_id!(
    /// Application plan ID.
    PlanId
);
remote_id!(
    /// Plan limit ID.
    LimitId
);

/// A service: the root scope of every other entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    #[serde(default)]
    pub name: String,
    pub system_name: String,
}

/// A metric of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub id: MetricId,
    pub system_name: String,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub unit: String,
}

/// A binding from an HTTP method and path pattern to a metric increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub id: MappingRuleId,
    pub metric_id: MetricId,
    pub pattern: String,
    pub http_method: String,
    pub delta: i64,
}

impl MappingRule {
    /// The value tuple this rule is identified by.
    pub fn key(&self) -> MappingRuleKey {
        MappingRuleKey {
            pattern: self.pattern.clone(),
            http_method: self.http_method.to_ascii_uppercase(),
            metric_id: self.metric_id,
            delta: self.delta,
        }
    }
}

/// Value identity of a mapping rule: two rules are the same when pattern,
/// method, metric and delta are all equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MappingRuleKey {
    pub pattern: String,
    pub http_method: String,
    pub metric_id: MetricId,
    pub delta: i64,
}

impl fmt::Display for MappingRuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> metric {} (+{})",
            self.http_method, self.pattern, self.metric_id, self.delta
        )
    }
}

/// Request body for creating a mapping rule.
pub type NewMappingRule = MappingRuleKey;

/// An application plan of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPlan {
    pub id: PlanId,
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub default: bool,
}

/// Publication state of a newly created plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanState {
    /// Visible to developers.
    #[default]
    Publish,
    /// Hidden from developers.
    Hide,
}

impl PlanState {
    /// The `state_event` sent to the backend.
    pub const fn as_event(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Hide => "hide",
        }
    }

    /// The state the backend reports after the event is applied.
    pub const fn as_state(self) -> &'static str {
        match self {
            Self::Publish => "published",
            Self::Hide => "hidden",
        }
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_event())
    }
}

/// A limit on a metric within a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub id: LimitId,
    pub metric_id: MetricId,
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    pub period: String,
    pub value: i64,
}

/// Gateway proxy settings of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub service_id: ServiceId,
    #[serde(default)]
    pub api_backend: Option<String>,
}

/// Gateway configuration environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    /// Path segment used by the backend.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deployed version of the gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub version: u64,
    pub environment: Environment,
}
