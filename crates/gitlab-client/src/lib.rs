//! GitLab REST API Client
//!
//! A small, typed client for the parts of the GitLab v4 API the object
//! handler controller talks to: merge requests, merge request notes and
//! approvals.
//!
//! # Example
//!
//! ```no_run
//! use gitlab_client::{GitlabClient, GitlabClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GitlabClient::new("https://gitlab.example.com", Some("glpat-xxxx".to_string()))?;
//!
//! let mr = client.get_merge_request("group/app", 42).await?;
//! if mr.state == "opened" {
//!     let note = client.create_note("group/app", 42, "Deployment app is ready").await?;
//!     client.update_note("group/app", 42, note.id, "Deployment app is not ready").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
#[path = "trait.rs"]
pub mod gitlab_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod models;

pub use client::GitlabClient;
pub use common::HttpClient;
pub use error::GitlabError;
pub use gitlab_trait::GitlabClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockGitlabClient;
pub use models::*;
