//! GitlabClient trait for mocking
//!
//! The concrete `GitlabClient` implements this trait; handler tests use the
//! in-memory `MockGitlabClient` instead.

use crate::error::GitlabError;
use crate::models::{Approvals, MergeRequest, Note};

/// Trait for GitLab merge request operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait GitlabClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Fetch a merge request by project and IID
    async fn get_merge_request(&self, project: &str, iid: u64) -> Result<MergeRequest, GitlabError>;

    /// Post a new note on a merge request
    async fn create_note(&self, project: &str, iid: u64, body: &str) -> Result<Note, GitlabError>;

    /// Replace the body of an existing note
    async fn update_note(&self, project: &str, iid: u64, note_id: u64, body: &str) -> Result<Note, GitlabError>;

    /// Approval state of a merge request, as seen by the token's user
    async fn get_approvals(&self, project: &str, iid: u64) -> Result<Approvals, GitlabError>;

    /// Approve a merge request as the token's user; GitLab rejects a
    /// second approval by the same user with 401
    async fn approve(&self, project: &str, iid: u64) -> Result<(), GitlabError>;

    /// Revoke the token user's approval; `NotFound` if there was none
    async fn unapprove(&self, project: &str, iid: u64) -> Result<(), GitlabError>;
}
