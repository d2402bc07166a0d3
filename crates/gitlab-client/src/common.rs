//! Common utilities for the GitLab API client
//!
//! Provides the authenticated HTTP wrapper shared by all API calls.

use crate::error::GitlabError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Header carrying a personal/project access token
const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// HTTP client wrapper with authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    ///
    /// `base_url` is the GitLab root (e.g., "https://gitlab.com"); the
    /// `/api/v4` prefix is added here.
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full API URL from a path below `/api/v4`
    pub fn build_url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    /// Path of a merge request, with the project ID or path URL-encoded
    pub fn merge_request_path(project: &str, iid: u64) -> String {
        format!("/projects/{}/merge_requests/{}", urlencoding::encode(project), iid)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GitlabError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self.authorize(self.client.get(&url)).send().await?;
        Self::decode("GET", path, response).await
    }

    /// Make a POST request; `body` may be `None` for action endpoints
    pub async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, GitlabError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let mut request = self.authorize(self.client.post(&url));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::decode("POST", path, response).await
    }

    /// Make a PUT request
    pub async fn put<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GitlabError> {
        let url = self.build_url(path);
        debug!("PUT {}", url);

        let response = self.authorize(self.client.put(&url)).json(body).send().await?;
        Self::decode("PUT", path, response).await
    }

    /// Map the response status to a `GitlabError` or decode the body
    async fn decode<T: DeserializeOwned>(
        method: &str,
        path: &str,
        response: Response,
    ) -> Result<T, GitlabError> {
        let status = response.status();
        if status.is_success() {
            let text = response.text().await?;
            // Action endpoints may answer with an empty body
            let text = if text.trim().is_empty() { "null" } else { text.as_str() };
            return Ok(serde_json::from_str(text)?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => GitlabError::NotFound(format!("{path} - {body}")),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                GitlabError::Authentication(format!("{method} {path}: {status} - {body}"))
            }
            _ => GitlabError::Api(format!("{method} {path} failed: {status} - {body}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_strips_trailing_slash() {
        let http = HttpClient::new(Client::new(), "https://gitlab.example.com/", None);
        assert_eq!(http.base_url(), "https://gitlab.example.com");
        assert_eq!(
            http.build_url("/projects/1"),
            "https://gitlab.example.com/api/v4/projects/1"
        );
    }

    #[test]
    fn test_merge_request_path_encodes_project() {
        assert_eq!(
            HttpClient::merge_request_path("group/sub/app", 7),
            "/projects/group%2Fsub%2Fapp/merge_requests/7"
        );
        assert_eq!(HttpClient::merge_request_path("42", 1), "/projects/42/merge_requests/1");
    }
}
