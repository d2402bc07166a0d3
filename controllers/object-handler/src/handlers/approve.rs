//! `pullRequestApprove` handler
//!
//! Holds an approval on the merge request while the target is ready and
//! withdraws it when the target stops being ready.

use super::{Handler, Target, state_matches, summarize};
use crate::error::ControllerError;
use crds::{GitlabMergeRequestRef, HandlerStatus};
use gitlab_client::GitlabClientTrait;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ApproveHandler {
    client: Arc<dyn GitlabClientTrait>,
    gitlab: GitlabMergeRequestRef,
}

impl ApproveHandler {
    pub fn new(client: Arc<dyn GitlabClientTrait>, gitlab: GitlabMergeRequestRef) -> Self {
        Self { client, gitlab }
    }
}

#[async_trait::async_trait]
impl Handler for ApproveHandler {
    async fn handle(&self, target: &Target<'_>, status: &mut HandlerStatus) -> Result<(), ControllerError> {
        let (project, iid) = (self.gitlab.project.as_str(), self.gitlab.merge_request_id);
        let merge_request = self.client.get_merge_request(project, iid).await?;
        if !state_matches(&self.gitlab, &merge_request) {
            debug!("Skipping approval of {}!{} in state {}", project, iid, merge_request.state);
            return Ok(());
        }

        let ready = summarize(target.object).ready == Some(true);
        // A fresh record does not know about an approval given earlier
        let approved = match status.approved {
            Some(approved) => approved,
            None => self.client.get_approvals(project, iid).await?.user_has_approved,
        };

        if ready && !approved {
            self.client.approve(project, iid).await?;
            info!("Approved {}!{}: {} {} is ready", project, iid, target.reference.kind, target.reference.name);
            status.approved = Some(true);
        } else if !ready && approved {
            match self.client.unapprove(project, iid).await {
                Ok(()) => info!("Withdrew approval of {}!{}", project, iid),
                Err(e) if e.is_not_found() => debug!("{}!{} was not approved", project, iid),
                Err(e) => return Err(e.into()),
            }
            status.approved = Some(false);
        } else {
            status.approved = Some(approved);
        }
        Ok(())
    }
}
