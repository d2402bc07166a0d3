//! Validation errors for ObjectHandler specs.

use thiserror::Error;

/// Errors raised while validating an `ObjectHandler` spec.
///
/// All of these are configuration errors: retrying without changing the
/// resource will not help, so the controller reports them in the Ready
/// condition instead of retrying with backoff.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// A handler entry does not select any handler kind
    #[error("no handler specified")]
    NoHandler,

    /// A handler entry selects more than one handler kind
    #[error("ambiguous handler, only one of {} may be set", .0.join(", "))]
    AmbiguousHandler(Vec<&'static str>),

    /// `forObject` is missing a required field
    #[error("invalid forObject reference: {0}")]
    InvalidReference(String),

    /// `interval` is not a valid duration string
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    /// Handler config could not be canonicalized for key derivation
    #[error("failed to derive handler key: {0}")]
    Key(String),
}
