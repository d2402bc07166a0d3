//! `pullRequestComment` handler
//!
//! Keeps one note on the merge request describing the target's state. The
//! note is created on first run and edited afterwards; nothing is sent while
//! the rendered report is unchanged.

use super::{Handler, Target, render_report, report_hash, state_matches};
use crate::error::ControllerError;
use crds::{GitlabMergeRequestRef, HandlerStatus};
use gitlab_client::{GitlabClientTrait, Note};
use std::sync::Arc;
use tracing::debug;

pub struct CommentHandler {
    client: Arc<dyn GitlabClientTrait>,
    gitlab: GitlabMergeRequestRef,
}

impl CommentHandler {
    pub fn new(client: Arc<dyn GitlabClientTrait>, gitlab: GitlabMergeRequestRef) -> Self {
        Self { client, gitlab }
    }

    async fn post(&self, comment_id: Option<u64>, body: &str) -> Result<Note, ControllerError> {
        let (project, iid) = (self.gitlab.project.as_str(), self.gitlab.merge_request_id);
        if let Some(id) = comment_id {
            match self.client.update_note(project, iid, id, body).await {
                Ok(note) => return Ok(note),
                // Deleted by a user; post a fresh one
                Err(e) if e.is_not_found() => debug!("Note {} on {}!{} is gone, recreating", id, project, iid),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.client.create_note(project, iid, body).await?)
    }
}

#[async_trait::async_trait]
impl Handler for CommentHandler {
    async fn handle(&self, target: &Target<'_>, status: &mut HandlerStatus) -> Result<(), ControllerError> {
        let merge_request = self
            .client
            .get_merge_request(&self.gitlab.project, self.gitlab.merge_request_id)
            .await?;
        if !state_matches(&self.gitlab, &merge_request) {
            debug!(
                "Skipping comment on {}!{} in state {}",
                self.gitlab.project, merge_request.iid, merge_request.state
            );
            return Ok(());
        }

        let body = render_report(target);
        let hash = report_hash(&body);
        if status.comment_id.is_some() && status.last_posted_status_hash.as_deref() == Some(hash.as_str()) {
            return Ok(());
        }

        let note = self.post(status.comment_id, &body).await?;
        status.comment_id = Some(note.id);
        status.last_posted_status_hash = Some(hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{deployment, gitlab_ref};
    use crds::TargetObjectRef;
    use gitlab_client::MockGitlabClient;

    fn handler(mock: &MockGitlabClient, state: Option<&str>) -> CommentHandler {
        CommentHandler::new(Arc::new(mock.clone()), gitlab_ref("group/app", 7, state))
    }

    #[tokio::test]
    async fn test_posts_once_then_updates_on_change() {
        let mock = MockGitlabClient::new("https://gitlab.example.com");
        mock.add_merge_request("group/app", 7, "opened");
        let handler = handler(&mock, None);
        let reference = TargetObjectRef::new("apps", "v1", "Deployment", "app");
        let ready = deployment("ns", "app", true);
        let target = Target { reference: &reference, namespace: "ns", object: &ready };
        let mut status = HandlerStatus::new("k");

        handler.handle(&target, &mut status).await.unwrap();
        handler.handle(&target, &mut status).await.unwrap();
        assert_eq!(mock.writes(), vec!["create_note group/app!7"]);
        assert!(status.comment_id.is_some());

        let not_ready = deployment("ns", "app", false);
        let target = Target { reference: &reference, namespace: "ns", object: &not_ready };
        handler.handle(&target, &mut status).await.unwrap();

        let notes = mock.notes("group/app", 7);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].body.contains("is not ready"));
        assert_eq!(mock.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_recreates_deleted_note() {
        let mock = MockGitlabClient::new("https://gitlab.example.com");
        mock.add_merge_request("group/app", 7, "opened");
        let handler = handler(&mock, None);
        let reference = TargetObjectRef::new("apps", "v1", "Deployment", "app");
        let ready = deployment("ns", "app", true);
        let target = Target { reference: &reference, namespace: "ns", object: &ready };
        let mut status = HandlerStatus {
            comment_id: Some(999),
            last_posted_status_hash: Some("stale".into()),
            ..HandlerStatus::new("k")
        };

        handler.handle(&target, &mut status).await.unwrap();
        assert_ne!(status.comment_id, Some(999));
        assert_eq!(mock.notes("group/app", 7).len(), 1);
    }

    #[tokio::test]
    async fn test_state_filter_skips_other_states() {
        let mock = MockGitlabClient::new("https://gitlab.example.com");
        mock.add_merge_request("group/app", 7, "merged");
        let handler = handler(&mock, Some("opened"));
        let reference = TargetObjectRef::new("apps", "v1", "Deployment", "app");
        let ready = deployment("ns", "app", true);
        let target = Target { reference: &reference, namespace: "ns", object: &ready };
        let mut status = HandlerStatus::new("k");

        handler.handle(&target, &mut status).await.unwrap();
        assert!(mock.writes().is_empty());
        assert_eq!(status.comment_id, None);
    }
}
