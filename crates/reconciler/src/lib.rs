//! Convergence engine for 3scale service configuration.
//!
//! A pass compares the desired state of one service (endpoints with their
//! metric usages, plans with their limits) against the account-management
//! backend and issues the creates, updates and deletes that close the gap.
//!
//! # Phases
//!
//! Each pass runs the [`Phase::PIPELINE`] in order:
//!
//! 1. `Metrics`: create missing metrics (blocking), delete orphans
//! 2. `MappingRules`: match rules by `(pattern, method, metric, delta)`
//! 3. `PlansAndLimits`: resolve plans by name, converge each plan's limits
//! 4. `Proxy`: point the gateway at the upstream and promote the config
//!
//! Deletes and limit updates run in a bounded background group that is
//! always settled before the pass returns, so every outcome is in the
//! [`PassReport`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ostia_core::DesiredState;
//! use ostia_reconciler::{ReconcilerBuilder, ReconciliationLoop, LoopConfig,
//!     InMemoryDesiredStateProvider};
//! use ostia_system_client::InMemorySystem;
//!
//! #[tokio::main]
//! async fn main() -> ostia_reconciler::Result<()> {
//!     let reconciler = Arc::new(
//!         ReconcilerBuilder::new()
//!             .with_system(Arc::new(InMemorySystem::new()))
//!             .build()?,
//!     );
//!     let report = reconciler.sync(&DesiredState::new(), "widgets").await?;
//!     assert!(report.converged());
//!
//!     let desired = Arc::new(InMemoryDesiredStateProvider::new(DesiredState::new()));
//!     let mut runner = ReconciliationLoop::new(reconciler, desired, "widgets", LoopConfig::default());
//!     // runner.run().await
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod background;
pub mod config;
pub mod error;
pub mod r#loop;
pub mod mapping_rules;
pub mod metrics;
pub mod plans;
pub mod projection;
pub mod proxy;
pub mod reconciler;
pub mod scope;
pub mod types;

pub use background::TaskGroup;
pub use config::ReconcilerConfig;
pub use error::{Error, Result};
pub use r#loop::{
    DesiredStateProvider, InMemoryDesiredStateProvider, LoopConfig, LoopStopper,
    ReconciliationLoop,
};
pub use reconciler::{Reconciler, ReconcilerBuilder};
pub use types::{ActionKind, PassReport, Phase, ReconcileAction, SyncStatus};
