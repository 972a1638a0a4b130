//! GitLab webhook payload model.
//!
//! Payloads are discriminated by `object_kind`. Nested records are optional
//! wherever GitLab omits them for some kinds, and string fields tolerate
//! `null`, so parsing only fails for structurally unusable deliveries.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

const SUPPORTED_OBJECT_KINDS: &[&str] = &[
    "push",
    "tag_push",
    "issue",
    "merge_request",
    "note",
    "build",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookParseReasonCode {
    InvalidJson,
    MissingObjectKind,
    UnsupportedKind,
    MissingField,
    InvalidPayload,
}

impl WebhookParseReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::MissingObjectKind => "missing_object_kind",
            Self::UnsupportedKind => "unsupported_kind",
            Self::MissingField => "missing_field",
            Self::InvalidPayload => "invalid_payload",
        }
    }
}

#[derive(Debug, Error)]
pub enum WebhookParseError {
    #[error("webhook body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("webhook payload has no object_kind")]
    MissingObjectKind,
    #[error("unsupported webhook object_kind '{0}'")]
    UnsupportedKind(String),
    #[error("{kind} webhook is missing required field '{field}'")]
    MissingField { kind: &'static str, field: &'static str },
    #[error("{kind} webhook payload is invalid: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl WebhookParseError {
    pub fn reason_code(&self) -> WebhookParseReasonCode {
        match self {
            Self::InvalidJson(_) => WebhookParseReasonCode::InvalidJson,
            Self::MissingObjectKind => WebhookParseReasonCode::MissingObjectKind,
            Self::UnsupportedKind(_) => WebhookParseReasonCode::UnsupportedKind,
            Self::MissingField { .. } => WebhookParseReasonCode::MissingField,
            Self::InvalidPayload { .. } => WebhookParseReasonCode::InvalidPayload,
        }
    }
}

fn null_to_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Repository {
    #[serde(default, deserialize_with = "null_to_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub homepage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProjectInfo {
    #[serde(default, deserialize_with = "null_to_default")]
    pub path_with_namespace: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub web_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WebhookUser {
    #[serde(default, deserialize_with = "null_to_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CommitAuthor {
    #[serde(default, deserialize_with = "null_to_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushCommit {
    pub id: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub message: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub url: String,
    #[serde(default)]
    pub author: CommitAuthor,
    #[serde(default, deserialize_with = "null_to_default")]
    pub added: Vec<String>,
    #[serde(default, deserialize_with = "null_to_default")]
    pub modified: Vec<String>,
    #[serde(default, deserialize_with = "null_to_default")]
    pub removed: Vec<String>,
}

/// Shared shape of `push` and `tag_push` deliveries.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref", default, deserialize_with = "null_to_default")]
    pub git_ref: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub before: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub after: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub user_name: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub user_username: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub user_email: String,
    #[serde(default)]
    pub project_id: u64,
    #[serde(default)]
    pub project: Option<ProjectInfo>,
    #[serde(default)]
    pub repository: Repository,
    #[serde(default, deserialize_with = "null_to_default")]
    pub commits: Vec<PushCommit>,
}

impl PushEvent {
    /// Branch or tag name (`refs/heads/feature/x` -> `feature/x`).
    pub fn short_ref(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .or_else(|| self.git_ref.strip_prefix("refs/tags/"))
            .unwrap_or_else(|| self.git_ref.rsplit('/').next().unwrap_or_default())
    }

    /// `tag` or `branch` for standard refs, else the ref's namespace segment.
    pub fn ref_kind(&self) -> &str {
        if self.git_ref.starts_with("refs/tags/") {
            return "tag";
        }
        if self.git_ref.starts_with("refs/heads/") {
            return "branch";
        }
        self.git_ref.rsplit('/').nth(1).unwrap_or_default()
    }

    pub fn project_path(&self) -> Option<&str> {
        self.project
            .as_ref()
            .map(|project| project.path_with_namespace.as_str())
            .filter(|path| !path.is_empty())
    }

    pub fn is_branch_deleted(&self) -> bool {
        self.after.is_empty() || self.after == ZERO_SHA
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ObjectAttributes {
    #[serde(default, deserialize_with = "null_to_default")]
    pub id: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub iid: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub note: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub noteable_type: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub project_id: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub created_at: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub commit_id: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub state: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IssueEvent {
    #[serde(default)]
    pub user: WebhookUser,
    #[serde(default)]
    pub repository: Repository,
    #[serde(default)]
    pub project: Option<ProjectInfo>,
    pub object_attributes: ObjectAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MergeRequestEvent {
    #[serde(default)]
    pub user: WebhookUser,
    #[serde(default)]
    pub repository: Repository,
    #[serde(default)]
    pub project: Option<ProjectInfo>,
    pub object_attributes: ObjectAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NotedIssue {
    pub id: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub iid: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NotedMergeRequest {
    pub id: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub iid: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NotedSnippet {
    pub id: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NoteEvent {
    #[serde(default)]
    pub user: WebhookUser,
    #[serde(default)]
    pub project_id: u64,
    #[serde(default)]
    pub repository: Repository,
    pub object_attributes: ObjectAttributes,
    #[serde(default)]
    pub issue: Option<NotedIssue>,
    #[serde(default)]
    pub merge_request: Option<NotedMergeRequest>,
    #[serde(default)]
    pub snippet: Option<NotedSnippet>,
}

impl NoteEvent {
    pub fn project_id(&self) -> u64 {
        if self.object_attributes.project_id > 0 {
            self.object_attributes.project_id
        } else {
            self.project_id
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BuildEvent {
    #[serde(default, deserialize_with = "null_to_default")]
    pub sha: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub build_id: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub build_status: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub build_name: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub build_stage: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub build_duration: f64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub build_allow_failure: bool,
    #[serde(default)]
    pub project_id: u64,
    #[serde(default)]
    pub user: WebhookUser,
    #[serde(default)]
    pub repository: Repository,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteableKind {
    Commit,
    MergeRequest,
    Issue,
    Snippet,
    Other(String),
}

impl NoteableKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Commit" => Self::Commit,
            "MergeRequest" => Self::MergeRequest,
            "Issue" => Self::Issue,
            "Snippet" => Self::Snippet,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Commit => "commit".to_string(),
            Self::MergeRequest => "merge request".to_string(),
            Self::Issue => "issue".to_string(),
            Self::Snippet => "snippet".to_string(),
            Self::Other(raw) => raw.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Other(String),
}

impl BuildStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" | "created" => Self::Pending,
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A parsed delivery, discriminated by `object_kind`.
#[derive(Debug, Clone, PartialEq)]
pub enum GitlabWebhook {
    Push(PushEvent),
    TagPush(PushEvent),
    Issue(IssueEvent),
    MergeRequest(MergeRequestEvent),
    Note(NoteEvent),
    Build(BuildEvent),
}

impl GitlabWebhook {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Push(_) => "push",
            Self::TagPush(_) => "tag_push",
            Self::Issue(_) => "issue",
            Self::MergeRequest(_) => "merge_request",
            Self::Note(_) => "note",
            Self::Build(_) => "build",
        }
    }

    pub fn repository(&self) -> &Repository {
        match self {
            Self::Push(event) | Self::TagPush(event) => &event.repository,
            Self::Issue(event) => &event.repository,
            Self::MergeRequest(event) => &event.repository,
            Self::Note(event) => &event.repository,
            Self::Build(event) => &event.repository,
        }
    }

    /// Candidate URLs to derive the GitLab instance base URL from, in order.
    pub fn base_url_candidates(&self) -> Vec<&str> {
        let mut candidates = vec![self.repository().homepage.as_str()];
        match self {
            Self::Issue(event) => candidates.push(event.object_attributes.url.as_str()),
            Self::MergeRequest(event) => candidates.push(event.object_attributes.url.as_str()),
            Self::Note(event) => candidates.push(event.object_attributes.url.as_str()),
            Self::Push(event) | Self::TagPush(event) => {
                if let Some(commit) = event.commits.first() {
                    candidates.push(commit.url.as_str());
                }
            }
            Self::Build(event) => candidates.push(event.repository.url.as_str()),
        }
        candidates.retain(|candidate| !candidate.trim().is_empty());
        candidates
    }
}

/// Parses a raw webhook body.
pub fn parse_gitlab_webhook(raw: &str) -> Result<GitlabWebhook, WebhookParseError> {
    let value = serde_json::from_str::<Value>(raw).map_err(WebhookParseError::InvalidJson)?;
    parse_gitlab_webhook_value(value)
}

pub fn parse_gitlab_webhook_value(value: Value) -> Result<GitlabWebhook, WebhookParseError> {
    let kind = value
        .get("object_kind")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(WebhookParseError::MissingObjectKind)?;
    if !SUPPORTED_OBJECT_KINDS.contains(&kind.as_str()) {
        return Err(WebhookParseError::UnsupportedKind(kind));
    }
    let needs_attributes = matches!(kind.as_str(), "issue" | "merge_request" | "note");
    if needs_attributes
        && !value
            .get("object_attributes")
            .is_some_and(Value::is_object)
    {
        let kind = SUPPORTED_OBJECT_KINDS
            .iter()
            .copied()
            .find(|supported| *supported == kind)
            .unwrap_or("unknown");
        return Err(WebhookParseError::MissingField {
            kind,
            field: "object_attributes",
        });
    }

    let invalid = |source| WebhookParseError::InvalidPayload {
        kind: kind.clone(),
        source,
    };
    let webhook = match kind.as_str() {
        "push" => GitlabWebhook::Push(serde_json::from_value(value).map_err(invalid)?),
        "tag_push" => GitlabWebhook::TagPush(serde_json::from_value(value).map_err(invalid)?),
        "issue" => GitlabWebhook::Issue(serde_json::from_value(value).map_err(invalid)?),
        "merge_request" => {
            GitlabWebhook::MergeRequest(serde_json::from_value(value).map_err(invalid)?)
        }
        "note" => GitlabWebhook::Note(serde_json::from_value(value).map_err(invalid)?),
        _ => GitlabWebhook::Build(serde_json::from_value(value).map_err(invalid)?),
    };
    Ok(webhook)
}
