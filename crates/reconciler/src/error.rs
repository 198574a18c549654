//! Error types for the reconciler crate.

use thiserror::Error;

use crate::types::Phase;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Error, Debug)]
pub enum Error {
    /// No service with this system name exists.
    #[error("service '{system_name}' not found")]
    ServiceNotFound { system_name: String },

    /// The plans of the service could not be listed; nothing after it can run.
    #[error("failed to enumerate application plans of service '{service}': {reason}")]
    PlanEnumerationFailed { service: String, reason: String },

    /// A phase could not read the remote state it diffs against.
    #[error("{phase} phase could not read remote state: {reason}")]
    ReadFailed { phase: Phase, reason: String },

    /// The pass finished but some operations failed.
    #[error("pass {pass_id} incomplete: {failed} operation(s) failed, {phase_errors} phase error(s)")]
    PassIncomplete {
        pass_id: String,
        failed: usize,
        phase_errors: usize,
    },

    /// The desired state could not be produced.
    #[error("desired state unavailable: {reason}")]
    DesiredStateUnavailable { reason: String },

    /// Reconciliation failed.
    #[error("reconciliation failed: {reason}")]
    ReconcileFailed { reason: String },

    /// Loop was stopped.
    #[error("reconciliation loop stopped")]
    LoopStopped,

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Error from the account-management backend.
    #[error(transparent)]
    Remote(#[from] ostia_system_client::Error),
}

impl Error {
    /// Create a service not found error.
    pub fn service_not_found(system_name: impl Into<String>) -> Self {
        Self::ServiceNotFound {
            system_name: system_name.into(),
        }
    }

    /// Create a plan enumeration error.
    pub fn plan_enumeration_failed(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::PlanEnumerationFailed {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a read failed error.
    pub fn read_failed(phase: Phase, reason: impl ToString) -> Self {
        Self::ReadFailed {
            phase,
            reason: reason.to_string(),
        }
    }

    /// Create a desired state error.
    pub fn desired_state_unavailable(reason: impl ToString) -> Self {
        Self::DesiredStateUnavailable {
            reason: reason.to_string(),
        }
    }

    /// Create a reconcile failed error.
    pub fn reconcile_failed(reason: impl Into<String>) -> Self {
        Self::ReconcileFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether the error ends the pass before all phases ran.
    pub const fn is_pass_fatal(&self) -> bool {
        matches!(
            self,
            Self::PlanEnumerationFailed { .. } | Self::ServiceNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::reconcile_failed("something went wrong");
        assert!(err.to_string().contains("something went wrong"));
    }

    #[test]
    fn test_read_failed_names_phase() {
        let err = Error::read_failed(Phase::MappingRules, "timeout");
        assert_eq!(
            err.to_string(),
            "mapping-rules phase could not read remote state: timeout"
        );
        assert!(!err.is_pass_fatal());
    }

    #[test]
    fn test_plan_enumeration_is_fatal() {
        let err = Error::plan_enumeration_failed("widgets", "503");
        assert!(err.is_pass_fatal());
        assert!(err.to_string().contains("widgets"));
    }

    #[test]
    fn test_remote_errors_convert() {
        let err: Error = ostia_system_client::Error::not_found("service", 4).into();
        assert!(matches!(err, Error::Remote(ref e) if e.is_not_found()));
    }
}
