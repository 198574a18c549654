//! Reconciler tuning.

use ostia_system_client::PlanState;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Maximum background deletes/updates in flight at once.
    #[serde(default = "default_max_background_tasks")]
    pub max_background_tasks: usize,
    /// Unit of metrics created by the reconciler.
    #[serde(default = "default_metric_unit")]
    pub metric_unit: String,
    /// State of newly created plans.
    #[serde(default)]
    pub plan_state: PlanState,
    /// Promote the sandbox proxy config to production when they differ.
    #[serde(default = "default_promote_proxy")]
    pub promote_proxy: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_background_tasks: default_max_background_tasks(),
            metric_unit: default_metric_unit(),
            plan_state: PlanState::default(),
            promote_proxy: default_promote_proxy(),
        }
    }
}

impl ReconcilerConfig {
    /// Set the background task bound.
    #[must_use]
    pub const fn max_background_tasks(mut self, max: usize) -> Self {
        self.max_background_tasks = max;
        self
    }

    /// Set the unit for created metrics.
    #[must_use]
    pub fn metric_unit(mut self, unit: impl Into<String>) -> Self {
        self.metric_unit = unit.into();
        self
    }

    /// Set the state for created plans.
    #[must_use]
    pub const fn plan_state(mut self, state: PlanState) -> Self {
        self.plan_state = state;
        self
    }

    /// Enable/disable proxy promotion.
    #[must_use]
    pub const fn promote_proxy(mut self, enabled: bool) -> Self {
        self.promote_proxy = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_background_tasks == 0 {
            return Err(Error::invalid_config("max_background_tasks must be at least 1"));
        }
        if self.metric_unit.trim().is_empty() {
            return Err(Error::invalid_config("metric_unit must not be empty"));
        }
        Ok(())
    }
}

const fn default_max_background_tasks() -> usize {
    8
}

fn default_metric_unit() -> String {
    "hits".to_string()
}

const fn default_promote_proxy() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.max_background_tasks, 8);
        assert_eq!(config.metric_unit, "hits");
        assert_eq!(config.plan_state, PlanState::Publish);
        assert!(config.promote_proxy);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_background_tasks_is_invalid() {
        let config = ReconcilerConfig::default().max_background_tasks(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: std::result::Result<ReconcilerConfig, _> =
            serde_json::from_str(r#"{"plan_state":"hide","promote_proxy":false}"#);
        let config = config.ok();
        assert_eq!(config.as_ref().map(|c| c.plan_state), Some(PlanState::Hide));
        assert_eq!(config.as_ref().map(|c| c.promote_proxy), Some(false));
        assert_eq!(config.map(|c| c.max_background_tasks), Some(8));
    }
}
