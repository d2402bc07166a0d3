//! Handler specifications
//!
//! On the wire a handler is an object with one optional field per handler
//! kind. Exactly one of them must be set; [`HandlerSpec::kind`] turns the wire
//! form into the [`HandlerKind`] variant and rejects zero or multiple kinds.
//!
//! Each handler gets a stable key derived from its configuration. The key is
//! what ties a handler to its record in `status.handlerStatus` across passes.

use crate::error::SpecError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Hex characters of the config digest kept in a handler key
const KEY_HASH_LEN: usize = 16;

/// One entry of `spec.handlers`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HandlerSpec {
    /// Post and maintain a status comment on a merge request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request_comment: Option<PullRequestCommentHandler>,

    /// Approve a merge request while the target object is ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request_approve: Option<PullRequestApproveHandler>,
}

/// Comment handler configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestCommentHandler {
    /// GitLab merge request to comment on
    pub gitlab: GitlabMergeRequestRef,
}

/// Approve handler configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestApproveHandler {
    /// GitLab merge request to approve
    pub gitlab: GitlabMergeRequestRef,
}

/// A merge request on a GitLab instance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GitlabMergeRequestRef {
    /// Project ID or full path (e.g., "group/app")
    pub project: String,

    /// Merge request IID within the project
    pub merge_request_id: u64,

    /// GitLab URL (defaults to the controller's configured GitLab)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,

    /// Secret holding the API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_ref: Option<SecretKeyRef>,

    /// Only act while the merge request is in this state ("opened", "merged", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request_state: Option<String>,
}

/// Key within a Secret in the ObjectHandler's namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Secret name
    pub secret_name: String,

    /// Key inside the secret's data
    pub key: String,
}

/// A validated handler entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind<'a> {
    /// `pullRequestComment`
    PullRequestComment(&'a PullRequestCommentHandler),
    /// `pullRequestApprove`
    PullRequestApprove(&'a PullRequestApproveHandler),
}

impl HandlerKind<'_> {
    /// Wire name of the handler kind
    pub fn name(&self) -> &'static str {
        match self {
            HandlerKind::PullRequestComment(_) => "pullRequestComment",
            HandlerKind::PullRequestApprove(_) => "pullRequestApprove",
        }
    }

    /// Merge request targeted by the handler
    pub fn gitlab(&self) -> &GitlabMergeRequestRef {
        match self {
            HandlerKind::PullRequestComment(h) => &h.gitlab,
            HandlerKind::PullRequestApprove(h) => &h.gitlab,
        }
    }

    fn config(&self) -> Result<Value, serde_json::Error> {
        match self {
            HandlerKind::PullRequestComment(h) => serde_json::to_value(h),
            HandlerKind::PullRequestApprove(h) => serde_json::to_value(h),
        }
    }
}

impl HandlerSpec {
    /// Resolve the single handler kind selected by this entry
    pub fn kind(&self) -> Result<HandlerKind<'_>, SpecError> {
        let mut selected = Vec::with_capacity(1);
        if let Some(h) = &self.pull_request_comment {
            selected.push(HandlerKind::PullRequestComment(h));
        }
        if let Some(h) = &self.pull_request_approve {
            selected.push(HandlerKind::PullRequestApprove(h));
        }
        match selected.as_slice() {
            [] => Err(SpecError::NoHandler),
            [kind] => Ok(*kind),
            many => Err(SpecError::AmbiguousHandler(many.iter().map(HandlerKind::name).collect())),
        }
    }

    /// Stable key for this handler: `<kind>-<digest of canonical config>`.
    ///
    /// The digest is computed over JSON with sorted object keys, so the key
    /// does not depend on the field order of the source manifest.
    pub fn key(&self) -> Result<String, SpecError> {
        let kind = self.kind()?;
        let config = kind.config().map_err(|e| SpecError::Key(e.to_string()))?;
        let mut canonical = String::new();
        write_canonical(&config, &mut canonical);
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
        Ok(format!("{}-{}", kind.name(), &digest[..KEY_HASH_LEN]))
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
