//! Handler strategies
//!
//! A handler reports the state of the target object somewhere outside the
//! cluster. Each entry of `spec.handlers` is resolved by a [`HandlerFactory`]
//! into a [`Handler`]: the handler kind is validated, credentials are read
//! from the referenced Secret, and a GitLab client is built. Resolution
//! happens for all entries before any handler runs.

pub mod approve;
pub mod comment;

use crate::error::ControllerError;
use crate::repository::ObjectRepository;
use crds::{GitlabMergeRequestRef, HandlerKind, HandlerSpec, HandlerStatus, ObjectHandler, SecretKeyRef, TargetObjectRef};
use gitlab_client::{GitlabClient, GitlabClientTrait, MergeRequest};
use kube::ResourceExt;
use kube::core::DynamicObject;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::Arc;

/// The object a pass reports about
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub reference: &'a TargetObjectRef,
    pub namespace: &'a str,
    pub object: &'a DynamicObject,
}

/// A resolved handler strategy.
///
/// Implementations must be idempotent: calling `handle` again with an
/// unchanged target and a status that already records success has no
/// external side effects.
///
/// A call that exceeds the handler timeout is dropped at its current await
/// point. Fields written to `status` before that point are kept, so record
/// the result of each external write as soon as it returns. A request still
/// in flight when the timeout fires may take effect remotely without being
/// recorded, and is repeated on the next pass.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, target: &Target<'_>, status: &mut HandlerStatus) -> Result<(), ControllerError>;
}

/// Turns a handler specification into a runnable handler
#[async_trait::async_trait]
pub trait HandlerFactory: Send + Sync {
    async fn resolve(&self, instance: &ObjectHandler, spec: &HandlerSpec) -> Result<Box<dyn Handler>, ControllerError>;
}

/// Builds GitLab clients for a URL and optional token
pub trait GitlabConnector: Send + Sync {
    fn connect(&self, api: &str, token: Option<String>) -> Result<Arc<dyn GitlabClientTrait>, ControllerError>;
}

/// Connects to GitLab over HTTP
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpGitlabConnector;

impl GitlabConnector for HttpGitlabConnector {
    fn connect(&self, api: &str, token: Option<String>) -> Result<Arc<dyn GitlabClientTrait>, ControllerError> {
        Ok(Arc::new(GitlabClient::new(api, token)?))
    }
}

/// Resolves GitLab merge request handlers
pub struct GitlabHandlerFactory {
    repository: Arc<dyn ObjectRepository>,
    connector: Arc<dyn GitlabConnector>,
    default_api: String,
}

impl std::fmt::Debug for GitlabHandlerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitlabHandlerFactory")
            .field("default_api", &self.default_api)
            .finish_non_exhaustive()
    }
}

impl GitlabHandlerFactory {
    pub fn new(repository: Arc<dyn ObjectRepository>, connector: Arc<dyn GitlabConnector>, default_api: String) -> Self {
        Self {
            repository,
            connector,
            default_api,
        }
    }

    /// Read the API token from a Secret in the instance's namespace
    async fn resolve_token(&self, namespace: &str, token_ref: &SecretKeyRef) -> Result<String, ControllerError> {
        let secret = self
            .repository
            .get_secret(namespace, &token_ref.secret_name)
            .await?
            .ok_or_else(|| {
                ControllerError::SecretResolution(format!("secret {}/{} not found", namespace, token_ref.secret_name))
            })?;

        let bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(&token_ref.key))
            .ok_or_else(|| {
                ControllerError::SecretResolution(format!(
                    "key {:?} not found in secret {}/{}",
                    token_ref.key, namespace, token_ref.secret_name
                ))
            })?;

        let token = String::from_utf8(bytes.0.clone()).map_err(|e| {
            ControllerError::SecretResolution(format!(
                "key {:?} in secret {}/{} is not valid UTF-8: {}",
                token_ref.key, namespace, token_ref.secret_name, e
            ))
        })?;
        Ok(token.trim().to_string())
    }
}

#[async_trait::async_trait]
impl HandlerFactory for GitlabHandlerFactory {
    async fn resolve(&self, instance: &ObjectHandler, spec: &HandlerSpec) -> Result<Box<dyn Handler>, ControllerError> {
        let kind = spec.kind()?;
        let gitlab = kind.gitlab();
        let namespace = instance.namespace().unwrap_or_default();

        let token = match &gitlab.token_ref {
            Some(token_ref) => Some(self.resolve_token(&namespace, token_ref).await?),
            None => None,
        };
        let api = gitlab.api.as_deref().filter(|api| !api.is_empty()).unwrap_or(&self.default_api);
        let client = self.connector.connect(api, token)?;

        Ok(match kind {
            HandlerKind::PullRequestComment(h) => Box::new(comment::CommentHandler::new(client, h.gitlab.clone())),
            HandlerKind::PullRequestApprove(h) => Box::new(approve::ApproveHandler::new(client, h.gitlab.clone())),
        })
    }
}

/// Whether the handler applies to a merge request in this state
pub(crate) fn state_matches(gitlab: &GitlabMergeRequestRef, merge_request: &MergeRequest) -> bool {
    gitlab
        .pull_request_state
        .as_deref()
        .is_none_or(|wanted| wanted.eq_ignore_ascii_case(&merge_request.state))
}

/// Readiness of a target object as read from its status conditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSummary {
    pub ready: Option<bool>,
    pub condition: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// Summarize a target's readiness.
///
/// Uses the `Ready` condition, falling back to `Available` for kinds such
/// as Deployments that do not publish `Ready`.
pub fn summarize(object: &DynamicObject) -> TargetSummary {
    let conditions = object
        .data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let find = |type_: &str| {
        conditions
            .iter()
            .find(|c| c.get("type").and_then(Value::as_str) == Some(type_))
    };
    let text = |c: &Value, field: &str| c.get(field).and_then(Value::as_str).map(str::to_string);

    match find("Ready").or_else(|| find("Available")) {
        Some(c) => TargetSummary {
            ready: c.get("status").and_then(Value::as_str).map(|s| s == "True"),
            condition: text(c, "type"),
            reason: text(c, "reason"),
            message: text(c, "message"),
        },
        None => TargetSummary {
            ready: None,
            condition: None,
            reason: None,
            message: None,
        },
    }
}

/// Markdown status report posted by the comment handler
pub fn render_report(target: &Target<'_>) -> String {
    let summary = summarize(target.object);
    let state = match summary.ready {
        Some(true) => "ready",
        Some(false) => "not ready",
        None => "unknown",
    };

    let mut body = String::new();
    let _ = writeln!(
        body,
        "### {} `{}/{}` is {}",
        target.reference.kind, target.namespace, target.reference.name, state
    );
    if let Some(condition) = &summary.condition {
        let _ = writeln!(body);
        let _ = writeln!(body, "| Condition | Reason | Message |");
        let _ = writeln!(body, "|---|---|---|");
        let _ = writeln!(
            body,
            "| {} | {} | {} |",
            condition,
            summary.reason.as_deref().unwrap_or("-"),
            summary.message.as_deref().unwrap_or("-").replace('|', "\\|").replace('\n', " ")
        );
    }
    body
}

/// Hex SHA-256 of a report body
pub fn report_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}
