//! Core types for Ostia.
//!
//! - [`model`]: the desired state of a service (endpoints, operations,
//!   metric usages, plans and limits)
//! - [`canonical`]: order-insensitive equality over desired-state shapes
//! - [`definition`]: loading desired state from an OpenAPI document

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod canonical;
pub mod definition;
pub mod error;
pub mod model;

pub use canonical::{Canonical, canonical_form, equivalent, sort_canonical};
pub use definition::ApiDefinition;
pub use error::{Error, Result};
pub use model::{
    DesiredState, Endpoint, Endpoints, Limit, MetricUsage, OperationId, Plan, Plans, RouteUsage,
    normalize_method, operation_name,
};
