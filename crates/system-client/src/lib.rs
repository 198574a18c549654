//! Typed access to the 3scale account-management backend.
//!
//! The [`SystemApi`] trait is the only surface the reconciler talks to.
//! [`ThreeScaleClient`] implements it over HTTP; [`InMemorySystem`] keeps
//! the same contract in memory for tests and dry runs.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod types;

pub use api::SystemApi;
pub use client::ThreeScaleClient;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use memory::{FailureRule, InMemorySystem, Operation, OperationKind, ProxyStatus};
pub use types::{
    ApplicationPlan, Environment, Limit, LimitId, MappingRule, MappingRuleId, MappingRuleKey,
    Metric, MetricId, NewMappingRule, PlanId, PlanState, Proxy, ProxyConfig, Service, ServiceId,
};
