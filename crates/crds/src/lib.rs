//! ObjectHandler CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the object handler controller,
//! plus the pure helpers that belong to the resource shape: handler-kind
//! validation, handler key derivation, status conditions and interval parsing.

pub mod conditions;
pub mod duration;
pub mod error;
pub mod handler;
pub mod object_handler;
pub mod references;

pub use conditions::*;
pub use duration::parse_duration;
pub use error::SpecError;
pub use handler::*;
pub use object_handler::*;
pub use references::*;
