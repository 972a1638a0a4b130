//! GitLab REST v4 client for posting notes and resolving the current user.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::{
    event_key::NoteRef,
    http_retry::{
        clip_error_body, is_transient_status, is_transient_transport_error, retry_after_hint,
        RetryPolicy,
    },
};

/// Resource a reply is posted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoteTarget {
    Issue { project_id: u64, issue_iid: u64 },
    MergeRequest { project_id: u64, merge_request_iid: u64 },
    Snippet { project_id: u64, snippet_id: u64 },
    Commit { project_id: u64, commit_id: String },
}

impl NoteTarget {
    pub fn project_id(&self) -> u64 {
        match self {
            Self::Issue { project_id, .. }
            | Self::MergeRequest { project_id, .. }
            | Self::Snippet { project_id, .. }
            | Self::Commit { project_id, .. } => *project_id,
        }
    }

    fn api_path(&self) -> String {
        match self {
            Self::Issue {
                project_id,
                issue_iid,
            } => format!("projects/{project_id}/issues/{issue_iid}/notes"),
            Self::MergeRequest {
                project_id,
                merge_request_iid,
            } => format!("projects/{project_id}/merge_requests/{merge_request_iid}/notes"),
            Self::Snippet {
                project_id,
                snippet_id,
            } => format!("projects/{project_id}/snippets/{snippet_id}/notes"),
            Self::Commit {
                project_id,
                commit_id,
            } => format!("projects/{project_id}/repository/commits/{commit_id}/comments"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CreatedNote {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl CreatedNote {
    /// Correlation reference for the created note. Commit comments are keyed
    /// by creation time because the webhook for them is matched the same way.
    pub fn note_ref(&self, target: &NoteTarget) -> Option<NoteRef> {
        match target {
            NoteTarget::Commit { .. } => self.created_at.as_deref().map(NoteRef::created_at),
            _ => self
                .id
                .map(NoteRef::Id)
                .or_else(|| self.created_at.as_deref().map(NoteRef::created_at)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitlabUser {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum GitlabApiError {
    #[error("gitlab api {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("gitlab api {operation} failed with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode gitlab {operation}: {source}")]
    Decode {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
}

#[async_trait]
pub trait CommentApi: Send + Sync {
    async fn create_note(
        &self,
        base_url: &str,
        access_token: &str,
        target: &NoteTarget,
        body: &str,
    ) -> Result<CreatedNote>;

    async fn current_user(&self, base_url: &str, access_token: &str) -> Result<GitlabUser>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GitlabApiClientConfig {
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for GitlabApiClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

/// Stateless across instances: the base URL and bearer token travel with
/// every call since each chat user authorizes separately.
#[derive(Clone)]
pub struct GitlabApiClient {
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl GitlabApiClient {
    pub fn new(config: GitlabApiClientConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("tanuki-relay"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create gitlab api client")?;
        Ok(Self {
            http: client,
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay_ms),
        })
    }

    fn api_url(base_url: &str, path: &str) -> String {
        format!("{}/api/v4/{path}", base_url.trim_end_matches('/'))
    }

    async fn request_json<T, F>(
        &self,
        operation: &str,
        mut request_builder: F,
    ) -> Result<T, GitlabApiError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            match request_builder().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|source| {
                            GitlabApiError::Decode {
                                operation: operation.to_string(),
                                source,
                            }
                        });
                    }

                    let retry_after = retry_after_hint(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if self.retry.allows_retry_after(attempt) && is_transient_status(status) {
                        tracing::debug!(
                            operation,
                            attempt,
                            status = status.as_u16(),
                            "retrying gitlab api request"
                        );
                        tokio::time::sleep(self.retry.backoff(attempt, retry_after)).await;
                        continue;
                    }
                    return Err(GitlabApiError::Status {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: clip_error_body(&body, 800),
                    });
                }
                Err(error) => {
                    if self.retry.allows_retry_after(attempt) && is_transient_transport_error(&error)
                    {
                        tokio::time::sleep(self.retry.backoff(attempt, None)).await;
                        continue;
                    }
                    return Err(GitlabApiError::Transport {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl CommentApi for GitlabApiClient {
    async fn create_note(
        &self,
        base_url: &str,
        access_token: &str,
        target: &NoteTarget,
        body: &str,
    ) -> Result<CreatedNote> {
        let url = Self::api_url(base_url, &target.api_path());
        let payload = match target {
            NoteTarget::Commit { .. } => json!({ "note": body }),
            _ => json!({ "body": body }),
        };
        let note = self
            .request_json("create note", || {
                self.http
                    .post(url.as_str())
                    .bearer_auth(access_token.trim())
                    .json(&payload)
            })
            .await?;
        Ok(note)
    }

    async fn current_user(&self, base_url: &str, access_token: &str) -> Result<GitlabUser> {
        let url = Self::api_url(base_url, "user");
        let user = self
            .request_json("resolve current user", || {
                self.http.get(url.as_str()).bearer_auth(access_token.trim())
            })
            .await?;
        Ok(user)
    }
}
