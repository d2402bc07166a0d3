//! Controller-specific error types.
//!
//! This module defines the error type of the ObjectHandler controller and the
//! aggregated handler-failure list reported by the handler pipeline.

use crds::{REASON_ERROR, REASON_NOT_FOUND, SpecError};
use gitlab_client::GitlabError;
use kube::Error as KubeError;
use std::fmt;
use thiserror::Error;

/// Errors that can occur in the ObjectHandler Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// GitLab API error
    #[error("GitLab error: {0}")]
    Gitlab(#[from] GitlabError),

    /// Invalid controller configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid ObjectHandler spec (no/ambiguous handler, bad reference or interval)
    #[error("{0}")]
    Spec(#[from] SpecError),

    /// A handler's credentials could not be resolved
    #[error("Secret resolution failed: {0}")]
    SecretResolution(String),

    /// The object referenced by `forObject` does not exist
    #[error("Target object not found: {0}")]
    TargetNotFound(String),

    /// Registering a watch on a target kind failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// An external call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// One or more handlers failed during a pass
    #[error("{0}")]
    HandlerFailures(#[from] HandlerFailures),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Probe/metrics server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ControllerError {
    /// Reason written to the Ready condition when this error ends a pass
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerError::TargetNotFound(_) => REASON_NOT_FOUND,
            _ => REASON_ERROR,
        }
    }

    /// Errors worth retrying with backoff rather than at the next interval
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ControllerError::Kube(_) | ControllerError::Watch(_) | ControllerError::Timeout(_)
        )
    }
}

/// Execution failures collected across the handlers of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerFailures {
    failures: Vec<(String, String)>,
}

impl HandlerFailures {
    /// Record the failure of the handler with `key`
    pub fn push(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.failures.push((key.into(), message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// `Ok(())` when nothing failed
    pub fn into_result(self) -> Result<(), ControllerError> {
        if self.is_empty() { Ok(()) } else { Err(self.into()) }
    }
}

impl fmt::Display for HandlerFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.failures.len() == 1 { "handler" } else { "handlers" };
        write!(f, "{} {} failed: ", self.failures.len(), noun)?;
        for (i, (key, message)) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{key}: {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for HandlerFailures {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_failures_display() {
        let mut failures = HandlerFailures::default();
        assert!(failures.clone().into_result().is_ok());

        failures.push("pullRequestComment-aaaa", "boom");
        assert_eq!(failures.to_string(), "1 handler failed: pullRequestComment-aaaa: boom");

        failures.push("pullRequestApprove-bbbb", "denied");
        assert_eq!(failures.len(), 2);
        assert_eq!(
            failures.to_string(),
            "2 handlers failed: pullRequestComment-aaaa: boom; pullRequestApprove-bbbb: denied"
        );
        assert!(matches!(failures.into_result(), Err(ControllerError::HandlerFailures(_))));
    }

    #[test]
    fn test_reason() {
        assert_eq!(ControllerError::TargetNotFound("x".into()).reason(), REASON_NOT_FOUND);
        assert_eq!(ControllerError::Spec(SpecError::NoHandler).reason(), REASON_ERROR);
        assert!(ControllerError::Watch("x".into()).is_transient());
        assert!(!ControllerError::SecretResolution("x".into()).is_transient());
    }
}
