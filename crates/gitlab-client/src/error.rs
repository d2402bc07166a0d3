//! GitLab client errors

use thiserror::Error;

/// Errors that can occur when interacting with the GitLab API
#[derive(Debug, Error)]
pub enum GitlabError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// GitLab API returned an error
    #[error("GitLab API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (missing, invalid or under-privileged token)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl GitlabError {
    /// True for 404 responses
    pub fn is_not_found(&self) -> bool {
        matches!(self, GitlabError::NotFound(_))
    }
}
