//! GitLab API models
//!
//! Only the fields the controller reads are modelled; unknown fields are
//! ignored on deserialization.

use serde::{Deserialize, Serialize};

/// A merge request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeRequest {
    /// Global ID
    pub id: u64,
    /// Project-scoped ID, the one shown in the UI
    pub iid: u64,
    /// Owning project
    pub project_id: u64,
    /// Title
    #[serde(default)]
    pub title: String,
    /// `opened`, `closed`, `locked` or `merged`
    pub state: String,
    /// Browser URL
    #[serde(default)]
    pub web_url: String,
}

/// A note (comment) on a merge request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    /// Note ID
    pub id: u64,
    /// Markdown body
    pub body: String,
}

/// Approval state of a merge request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Approvals {
    /// Whether the token's user has approved
    #[serde(default)]
    pub user_has_approved: bool,
}

/// Request body for creating or editing a note
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteRequest {
    /// Markdown body
    pub body: String,
}
