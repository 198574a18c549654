//! Core types for the reconciler.

use std::fmt;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use ostia_system_client::{LimitId, MappingRuleId, MetricId, PlanId};
use serde::Serialize;
use ulid::Ulid;

use crate::error::{Error, Result};

/// A stage of the reconciliation pipeline.
///
/// Mapping rules and limits reference metric IDs, so metrics always come
/// first; the proxy is redeployed once the routing table has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Metrics,
    MappingRules,
    PlansAndLimits,
    Proxy,
}

impl Phase {
    /// Every phase, in execution order.
    pub const PIPELINE: [Self; 4] = [
        Self::Metrics,
        Self::MappingRules,
        Self::PlansAndLimits,
        Self::Proxy,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::MappingRules => "mapping-rules",
            Self::PlansAndLimits => "plans-and-limits",
            Self::Proxy => "proxy",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an action creates, changes or removes remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

/// Operations the reconciler issues against the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileAction {
    CreateMetric {
        metric: String,
    },
    DeleteMetric {
        metric: String,
        id: MetricId,
    },
    CreateMappingRule {
        http_method: String,
        pattern: String,
        metric: String,
        delta: i64,
    },
    DeleteMappingRule {
        http_method: String,
        pattern: String,
        id: MappingRuleId,
    },
    CreatePlan {
        plan: String,
    },
    DeletePlan {
        plan: String,
        id: PlanId,
    },
    SetDefaultPlan {
        plan: String,
        id: PlanId,
    },
    CreateLimit {
        plan: String,
        metric: String,
        period: String,
        max: i64,
    },
    UpdateLimit {
        plan: String,
        metric: String,
        period: String,
        id: LimitId,
        from: i64,
        to: i64,
    },
    DeleteLimit {
        plan: String,
        metric: String,
        period: String,
        id: LimitId,
    },
    UpdateProxy {
        api_backend: String,
    },
    PromoteProxy {
        version: u64,
    },
}

impl ReconcileAction {
    /// Kind of change this action makes.
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::CreateMetric { .. }
            | Self::CreateMappingRule { .. }
            | Self::CreatePlan { .. }
            | Self::CreateLimit { .. } => ActionKind::Create,
            Self::SetDefaultPlan { .. }
            | Self::UpdateLimit { .. }
            | Self::UpdateProxy { .. }
            | Self::PromoteProxy { .. } => ActionKind::Update,
            Self::DeleteMetric { .. }
            | Self::DeleteMappingRule { .. }
            | Self::DeletePlan { .. }
            | Self::DeleteLimit { .. } => ActionKind::Delete,
        }
    }

    /// Phase that issues this action.
    pub const fn phase(&self) -> Phase {
        match self {
            Self::CreateMetric { .. } | Self::DeleteMetric { .. } => Phase::Metrics,
            Self::CreateMappingRule { .. } | Self::DeleteMappingRule { .. } => Phase::MappingRules,
            Self::CreatePlan { .. }
            | Self::DeletePlan { .. }
            | Self::SetDefaultPlan { .. }
            | Self::CreateLimit { .. }
            | Self::UpdateLimit { .. }
            | Self::DeleteLimit { .. } => Phase::PlansAndLimits,
            Self::UpdateProxy { .. } | Self::PromoteProxy { .. } => Phase::Proxy,
        }
    }

    /// Get a description of the action.
    pub fn description(&self) -> String {
        match self {
            Self::CreateMetric { metric } => format!("create metric {metric}"),
            Self::DeleteMetric { metric, id } => format!("delete metric {metric} ({id})"),
            Self::CreateMappingRule {
                http_method,
                pattern,
                metric,
                delta,
            } => format!("create mapping rule {http_method} {pattern} -> {metric} (+{delta})"),
            Self::DeleteMappingRule {
                http_method,
                pattern,
                id,
            } => format!("delete mapping rule {http_method} {pattern} ({id})"),
            Self::CreatePlan { plan } => format!("create plan {plan}"),
            Self::DeletePlan { plan, id } => format!("delete plan {plan} ({id})"),
            Self::SetDefaultPlan { plan, .. } => format!("make plan {plan} the default"),
            Self::CreateLimit {
                plan,
                metric,
                period,
                max,
            } => format!("create limit {plan}: {metric}/{period} = {max}"),
            Self::UpdateLimit {
                plan,
                metric,
                period,
                from,
                to,
                ..
            } => format!("update limit {plan}: {metric}/{period} {from} -> {to}"),
            Self::DeleteLimit {
                plan,
                metric,
                period,
                id,
            } => format!("delete limit {plan}: {metric}/{period} ({id})"),
            Self::UpdateProxy { api_backend } => format!("point proxy at {api_backend}"),
            Self::PromoteProxy { version } => {
                format!("promote proxy config v{version} to production")
            }
        }
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Outcome of one convergence pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass_id: Ulid,
    /// Service system name.
    pub service: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Actions that were applied.
    pub actions_taken: Vec<ReconcileAction>,
    /// Actions that failed, with the reason.
    pub actions_failed: Vec<(ReconcileAction, String)>,
    /// Phases that could not read remote state.
    pub phase_errors: Vec<(Phase, String)>,
    /// Phases found already in sync.
    pub skipped_phases: Vec<Phase>,
    /// Desired entries left out because an earlier entry wins.
    pub ignored: Vec<(Phase, String)>,
    /// Background operations whose outcome is unknown.
    pub interrupted: usize,
}

impl PassReport {
    /// Start a report for a pass over `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            pass_id: Ulid::new(),
            service: service.into(),
            started_at: Utc::now(),
            finished_at: None,
            actions_taken: Vec::new(),
            actions_failed: Vec::new(),
            phase_errors: Vec::new(),
            skipped_phases: Vec::new(),
            ignored: Vec::new(),
            interrupted: 0,
        }
    }

    pub fn record_success(&mut self, action: ReconcileAction) {
        self.actions_taken.push(action);
    }

    pub fn record_failure(&mut self, action: ReconcileAction, reason: impl ToString) {
        self.actions_failed.push((action, reason.to_string()));
    }

    /// Record the outcome of a remote call made for `action`.
    pub fn record<T, E: fmt::Display>(
        &mut self,
        action: ReconcileAction,
        outcome: std::result::Result<T, E>,
    ) -> Option<T> {
        match outcome {
            Ok(value) => {
                self.record_success(action);
                Some(value)
            }
            Err(e) => {
                self.record_failure(action, e);
                None
            }
        }
    }

    pub fn record_phase_error(&mut self, phase: Phase, reason: impl ToString) {
        self.phase_errors.push((phase, reason.to_string()));
    }

    pub fn skip(&mut self, phase: Phase) {
        self.skipped_phases.push(phase);
    }

    /// Note a desired entry that was not reconciled. Not a failure.
    pub fn ignore(&mut self, phase: Phase, reason: impl ToString) {
        self.ignored.push((phase, reason.to_string()));
    }

    /// Stamp the end time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Whether `phase` applied any change in this pass.
    pub fn changed(&self, phase: Phase) -> bool {
        self.actions_taken.iter().any(|a| a.phase() == phase)
    }

    /// Applied actions of one kind.
    pub fn taken(&self, kind: ActionKind) -> Vec<&ReconcileAction> {
        self.actions_taken
            .iter()
            .filter(|a| a.kind() == kind)
            .collect_vec()
    }

    /// Check if every attempted operation succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.actions_failed.is_empty() && self.phase_errors.is_empty() && self.interrupted == 0
    }

    /// True when the remote state already matched: nothing applied, nothing failed.
    pub fn converged(&self) -> bool {
        self.actions_taken.is_empty() && self.all_succeeded()
    }

    /// Turn per-entity failures into an aggregated error.
    pub fn into_result(self) -> Result<Self> {
        if self.all_succeeded() {
            Ok(self)
        } else {
            Err(Error::PassIncomplete {
                pass_id: self.pass_id.to_string(),
                failed: self.actions_failed.len() + self.interrupted,
                phase_errors: self.phase_errors.len(),
            })
        }
    }
}

/// Whether the remote projections match the desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub endpoints: bool,
    pub plans: bool,
}

impl SyncStatus {
    pub const fn in_sync(self) -> bool {
        self.endpoints && self.plans
    }
}
