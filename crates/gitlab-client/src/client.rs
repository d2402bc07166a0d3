//! GitLab API client
//!
//! Implements the merge request, note and approval endpoints of the GitLab
//! v4 REST API: `/projects/:id/merge_requests/:iid[/notes|/approvals|/approve|/unapprove]`.

use crate::common::HttpClient;
use crate::error::GitlabError;
use crate::gitlab_trait::GitlabClientTrait;
use crate::models::{Approvals, MergeRequest, Note, NoteRequest};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// GitLab API client
#[derive(Debug, Clone)]
pub struct GitlabClient {
    http: HttpClient,
}

impl GitlabClient {
    /// Create a new GitLab client
    ///
    /// # Arguments
    /// * `base_url` - GitLab URL (e.g., "https://gitlab.com")
    /// * `token` - access token, or `None` for anonymous access
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, GitlabError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http: HttpClient::new(client, base_url, token),
        })
    }
}

#[async_trait::async_trait]
impl GitlabClientTrait for GitlabClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn get_merge_request(&self, project: &str, iid: u64) -> Result<MergeRequest, GitlabError> {
        self.http.get(&HttpClient::merge_request_path(project, iid)).await
    }

    async fn create_note(&self, project: &str, iid: u64, body: &str) -> Result<Note, GitlabError> {
        let path = format!("{}/notes", HttpClient::merge_request_path(project, iid));
        let note: Note = self
            .http
            .post(&path, Some(&NoteRequest { body: body.to_string() }))
            .await?;
        debug!("Created note {} on {}!{}", note.id, project, iid);
        Ok(note)
    }

    async fn update_note(&self, project: &str, iid: u64, note_id: u64, body: &str) -> Result<Note, GitlabError> {
        let path = format!("{}/notes/{}", HttpClient::merge_request_path(project, iid), note_id);
        self.http.put(&path, &NoteRequest { body: body.to_string() }).await
    }

    async fn get_approvals(&self, project: &str, iid: u64) -> Result<Approvals, GitlabError> {
        let path = format!("{}/approvals", HttpClient::merge_request_path(project, iid));
        self.http.get(&path).await
    }

    async fn approve(&self, project: &str, iid: u64) -> Result<(), GitlabError> {
        let path = format!("{}/approve", HttpClient::merge_request_path(project, iid));
        let _: Value = self.http.post::<Value, _>(&path, None).await?;
        debug!("Approved {}!{}", project, iid);
        Ok(())
    }

    async fn unapprove(&self, project: &str, iid: u64) -> Result<(), GitlabError> {
        let path = format!("{}/unapprove", HttpClient::merge_request_path(project, iid));
        let _: Value = self.http.post::<Value, _>(&path, None).await?;
        debug!("Unapproved {}!{}", project, iid);
        Ok(())
    }
}
