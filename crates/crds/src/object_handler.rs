//! ObjectHandler CRD
//!
//! Attaches a list of status-reporting handlers to another cluster object.

use crate::conditions::Condition;
use crate::duration::parse_duration;
use crate::error::SpecError;
use crate::handler::HandlerSpec;
use crate::references::TargetObjectRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interval used when `spec.interval` is omitted
pub const DEFAULT_INTERVAL: &str = "30s";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "templates.kluctl.io",
    version = "v1alpha1",
    kind = "ObjectHandler",
    namespaced,
    status = "ObjectHandlerStatus",
    shortname = "oh",
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.forObject.kind"}"#,
    printcolumn = r#"{"name":"Object","type":"string","jsonPath":".spec.forObject.name"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectHandlerSpec {
    /// Object the handlers report about
    pub for_object: TargetObjectRef,

    /// Handlers, executed in order
    #[serde(default)]
    pub handlers: Vec<HandlerSpec>,

    /// Reconciliation period (Go-style duration, e.g. "30s", "1m30s")
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_interval() -> String {
    DEFAULT_INTERVAL.to_string()
}

impl ObjectHandlerSpec {
    /// Parsed `interval`
    pub fn interval(&self) -> Result<Duration, SpecError> {
        parse_duration(&self.interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectHandlerStatus {
    /// Observability state; carries the `Ready` condition
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// One record per configured handler, keyed by handler key
    #[serde(default)]
    pub handler_status: Vec<HandlerStatus>,
}

impl ObjectHandlerStatus {
    /// Status record for `key`, if present
    pub fn handler(&self, key: &str) -> Option<&HandlerStatus> {
        self.handler_status.iter().find(|s| s.key == key)
    }
}

/// Outcome of the last execution of one handler
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HandlerStatus {
    /// Handler key derived from the handler configuration
    pub key: String,

    /// Last failure message, empty on success
    #[serde(default)]
    pub error: String,

    /// ID of the status comment posted by a comment handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<u64>,

    /// Hash of the last status summary posted as a comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_posted_status_hash: Option<String>,

    /// Whether an approve handler currently holds an approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
}

impl HandlerStatus {
    /// Fresh record for a handler seen for the first time
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }
}
