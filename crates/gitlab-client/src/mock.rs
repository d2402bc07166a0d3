//! Mock GitlabClient for unit testing
//!
//! Stores merge requests, notes and approvals in memory. Clones share state,
//! so a test can hand one clone to the code under test and inspect another.

use crate::error::GitlabError;
use crate::gitlab_trait::GitlabClientTrait;
use crate::models::{Approvals, MergeRequest, Note};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type MergeRequestKey = (String, u64);

/// Mock GitlabClient for testing
#[derive(Debug, Clone)]
pub struct MockGitlabClient {
    base_url: String,
    merge_requests: Arc<Mutex<HashMap<MergeRequestKey, MergeRequest>>>,
    notes: Arc<Mutex<HashMap<MergeRequestKey, Vec<Note>>>>,
    approvals: Arc<Mutex<HashSet<MergeRequestKey>>>,
    failing_projects: Arc<Mutex<HashSet<String>>>,
    writes: Arc<Mutex<Vec<String>>>,
    next_id: Arc<Mutex<u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockGitlabClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            merge_requests: Arc::new(Mutex::new(HashMap::new())),
            notes: Arc::new(Mutex::new(HashMap::new())),
            approvals: Arc::new(Mutex::new(HashSet::new())),
            failing_projects: Arc::new(Mutex::new(HashSet::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Register a merge request in the given state
    pub fn add_merge_request(&self, project: &str, iid: u64, state: &str) {
        let id = self.next_id();
        lock(&self.merge_requests).insert(
            (project.to_string(), iid),
            MergeRequest {
                id,
                iid,
                project_id: 1,
                title: format!("MR {iid}"),
                state: state.to_string(),
                web_url: format!("{}/{}/-/merge_requests/{}", self.base_url, project, iid),
            },
        );
    }

    /// Make every call against `project` fail with an API error
    pub fn fail_project(&self, project: &str) {
        lock(&self.failing_projects).insert(project.to_string());
    }

    /// Notes currently on a merge request
    pub fn notes(&self, project: &str, iid: u64) -> Vec<Note> {
        lock(&self.notes)
            .get(&(project.to_string(), iid))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the merge request is approved
    pub fn is_approved(&self, project: &str, iid: u64) -> bool {
        lock(&self.approvals).contains(&(project.to_string(), iid))
    }

    /// Mutating calls made so far, e.g. `create_note group/app!7`
    pub fn writes(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    fn next_id(&self) -> u64 {
        let mut next = lock(&self.next_id);
        let id = *next;
        *next += 1;
        id
    }

    fn check(&self, project: &str, iid: u64) -> Result<MergeRequestKey, GitlabError> {
        if lock(&self.failing_projects).contains(project) {
            return Err(GitlabError::Api(format!("injected failure for {project}")));
        }
        let key = (project.to_string(), iid);
        if !lock(&self.merge_requests).contains_key(&key) {
            return Err(GitlabError::NotFound(format!("merge request {project}!{iid}")));
        }
        Ok(key)
    }

    fn record(&self, op: &str, project: &str, iid: u64) {
        lock(&self.writes).push(format!("{op} {project}!{iid}"));
    }
}

#[async_trait::async_trait]
impl GitlabClientTrait for MockGitlabClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_merge_request(&self, project: &str, iid: u64) -> Result<MergeRequest, GitlabError> {
        let key = self.check(project, iid)?;
        lock(&self.merge_requests)
            .get(&key)
            .cloned()
            .ok_or_else(|| GitlabError::NotFound(format!("merge request {project}!{iid}")))
    }

    async fn create_note(&self, project: &str, iid: u64, body: &str) -> Result<Note, GitlabError> {
        let key = self.check(project, iid)?;
        let note = Note {
            id: self.next_id(),
            body: body.to_string(),
        };
        lock(&self.notes).entry(key).or_default().push(note.clone());
        self.record("create_note", project, iid);
        Ok(note)
    }

    async fn update_note(&self, project: &str, iid: u64, note_id: u64, body: &str) -> Result<Note, GitlabError> {
        let key = self.check(project, iid)?;
        let mut notes = lock(&self.notes);
        let note = notes
            .get_mut(&key)
            .and_then(|notes| notes.iter_mut().find(|n| n.id == note_id))
            .ok_or_else(|| GitlabError::NotFound(format!("note {note_id}")))?;
        note.body = body.to_string();
        let updated = note.clone();
        drop(notes);
        self.record("update_note", project, iid);
        Ok(updated)
    }

    async fn get_approvals(&self, project: &str, iid: u64) -> Result<Approvals, GitlabError> {
        let key = self.check(project, iid)?;
        Ok(Approvals {
            user_has_approved: lock(&self.approvals).contains(&key),
        })
    }

    async fn approve(&self, project: &str, iid: u64) -> Result<(), GitlabError> {
        let key = self.check(project, iid)?;
        if !lock(&self.approvals).insert(key) {
            return Err(GitlabError::Authentication(format!("{project}!{iid} already approved")));
        }
        self.record("approve", project, iid);
        Ok(())
    }

    async fn unapprove(&self, project: &str, iid: u64) -> Result<(), GitlabError> {
        let key = self.check(project, iid)?;
        if !lock(&self.approvals).remove(&key) {
            return Err(GitlabError::NotFound(format!("approval on {project}!{iid}")));
        }
        self.record("unapprove", project, iid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notes_create_and_update() {
        let mock = MockGitlabClient::new("https://gitlab.example.com");
        mock.add_merge_request("group/app", 7, "opened");

        let note = mock.create_note("group/app", 7, "first").await.unwrap();
        mock.update_note("group/app", 7, note.id, "second").await.unwrap();

        let notes = mock.notes("group/app", 7);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].body, "second");
        assert_eq!(mock.writes(), vec!["create_note group/app!7", "update_note group/app!7"]);
    }

    #[tokio::test]
    async fn test_unknown_merge_request_and_injected_failure() {
        let mock = MockGitlabClient::new("https://gitlab.example.com");
        assert!(mock.get_merge_request("group/app", 1).await.unwrap_err().is_not_found());

        mock.add_merge_request("group/app", 1, "opened");
        mock.fail_project("group/app");
        assert!(matches!(
            mock.create_note("group/app", 1, "x").await,
            Err(GitlabError::Api(_))
        ));
    }

    #[tokio::test]
    async fn test_unapprove_without_approval_is_not_found() {
        let mock = MockGitlabClient::new("https://gitlab.example.com");
        mock.add_merge_request("p", 1, "opened");
        assert!(mock.unapprove("p", 1).await.unwrap_err().is_not_found());

        mock.approve("p", 1).await.unwrap();
        assert!(mock.is_approved("p", 1));
        assert!(mock.get_approvals("p", 1).await.unwrap().user_has_approved);
        assert!(matches!(mock.approve("p", 1).await, Err(GitlabError::Authentication(_))));
        mock.unapprove("p", 1).await.unwrap();
        assert!(!mock.is_approved("p", 1));
    }
}
