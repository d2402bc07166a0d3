//! Target object references
//!
//! `forObject` points at an arbitrary Kubernetes object by group, version,
//! kind and name. The kind is only known at runtime, so the reference is kept
//! as plain strings and converted into a `GroupVersionKind` on demand.

use crate::error::SpecError;
use kube::core::GroupVersionKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to the object an `ObjectHandler` reports on.
///
/// The namespace defaults to the namespace of the referencing `ObjectHandler`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TargetObjectRef {
    /// API group of the target (empty or absent for the core group)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// API version of the target (e.g., "v1")
    pub version: String,

    /// Kind of the target (e.g., "Deployment")
    pub kind: String,

    /// Name of the target object
    pub name: String,

    /// Namespace of the target (defaults to the ObjectHandler's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl TargetObjectRef {
    /// Create a reference in the referencing resource's namespace
    pub fn new(group: &str, version: &str, kind: &str, name: &str) -> Self {
        Self {
            group: (!group.is_empty()).then(|| group.to_string()),
            version: version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: None,
        }
    }

    /// Same reference, pinned to an explicit namespace
    #[must_use]
    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// API group, with the core group as the empty string
    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or_default()
    }

    /// The target's group/version/kind
    pub fn group_version_kind(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(self.group(), &self.version, &self.kind)
    }

    /// Namespace the target lives in, applying the default-namespace rule.
    ///
    /// An explicitly empty namespace counts as unset.
    pub fn resolved_namespace<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default_namespace,
        }
    }

    /// Checks that version, kind and name are present
    pub fn validate(&self) -> Result<(), SpecError> {
        for (field, value) in [("version", &self.version), ("kind", &self.kind), ("name", &self.name)] {
            if value.trim().is_empty() {
                return Err(SpecError::InvalidReference(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for TargetObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group().is_empty() {
            write!(f, "{}/{} {}", self.version, self.kind, self.name)
        } else {
            write!(f, "{}/{}/{} {}", self.group(), self.version, self.kind, self.name)
        }
    }
}
