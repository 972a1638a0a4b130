//! Resumable reply intents and their chat/user-scoped storage.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tanuki_core::{get_json, set_json, CacheScope, KeyedCache};

use crate::{
    chat_transport::{ChatId, ChatUser, MessageId, UserId},
    chat_update::IncomingMessage,
    gitlab_api_client::NoteTarget,
    markup::{short_sha, truncate_chars},
};

const REPLY_BINDING_NAME: &str = "reply_binding";
const AFTER_AUTH_NAME: &str = "after_auth_action";
const CHAT_USER_NAME: &str = "chat_user";
const REPLY_BINDING_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const AFTER_AUTH_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const COMMIT_LABEL_MAX_CHARS: usize = 40;
const COMMIT_LABEL_SHA_CHARS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitChoice {
    pub id: String,
    pub label: String,
}

impl CommitChoice {
    pub fn new(id: impl Into<String>, message: &str) -> Self {
        let first_line = message.lines().next().unwrap_or_default().trim();
        Self {
            id: id.into(),
            label: truncate_chars(first_line, COMMIT_LABEL_MAX_CHARS),
        }
    }

    /// Builds one keyboard choice per `(sha, message)` pair. Labels shared by
    /// several commits get the short sha appended so every button resolves to
    /// exactly one commit.
    pub fn for_commits<'a>(commits: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<Self> {
        let mut choices = commits
            .into_iter()
            .map(|(id, message)| Self::new(id, message))
            .collect::<Vec<_>>();
        let mut label_counts = HashMap::<String, usize>::new();
        for choice in &choices {
            *label_counts.entry(choice.label.clone()).or_default() += 1;
        }
        for choice in &mut choices {
            if label_counts.get(&choice.label).copied().unwrap_or_default() > 1 {
                choice.label = format!(
                    "{} ({})",
                    choice.label,
                    short_sha(&choice.id, COMMIT_LABEL_SHA_CHARS)
                );
            }
        }
        choices
    }

    fn matches(&self, answer: &str) -> bool {
        let answer = answer.trim();
        !answer.is_empty() && (self.label == answer || self.id == answer)
    }
}

/// What the next message in a chat means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum ReplyIntent {
    HostedAppIdEntered {
        base_url: String,
    },
    HostedAppSecretEntered {
        base_url: String,
        app_id: String,
    },
    IssueReplied {
        base_url: String,
        project_id: u64,
        issue_iid: u64,
    },
    MergeRequestReplied {
        base_url: String,
        project_id: u64,
        merge_request_iid: u64,
    },
    SnippetReplied {
        base_url: String,
        project_id: u64,
        snippet_id: u64,
    },
    CommitReplied {
        base_url: String,
        project_id: u64,
        commit_id: String,
    },
    CommitsReplied {
        base_url: String,
        project_id: u64,
        commits: Vec<CommitChoice>,
    },
    CommitToReplySelected {
        base_url: String,
        project_id: u64,
        commits: Vec<CommitChoice>,
        comment: String,
        comment_message_id: MessageId,
    },
}

impl ReplyIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostedAppIdEntered { .. } => "hosted_app_id_entered",
            Self::HostedAppSecretEntered { .. } => "hosted_app_secret_entered",
            Self::IssueReplied { .. } => "issue_replied",
            Self::MergeRequestReplied { .. } => "merge_request_replied",
            Self::SnippetReplied { .. } => "snippet_replied",
            Self::CommitReplied { .. } => "commit_replied",
            Self::CommitsReplied { .. } => "commits_replied",
            Self::CommitToReplySelected { .. } => "commit_to_reply_selected",
        }
    }

    pub fn base_url(&self) -> &str {
        match self {
            Self::HostedAppIdEntered { base_url }
            | Self::HostedAppSecretEntered { base_url, .. }
            | Self::IssueReplied { base_url, .. }
            | Self::MergeRequestReplied { base_url, .. }
            | Self::SnippetReplied { base_url, .. }
            | Self::CommitReplied { base_url, .. }
            | Self::CommitsReplied { base_url, .. }
            | Self::CommitToReplySelected { base_url, .. } => base_url,
        }
    }

    /// Resource a comment bound by this intent is posted to.
    pub fn note_target(&self) -> Option<NoteTarget> {
        match self {
            Self::IssueReplied {
                project_id,
                issue_iid,
                ..
            } => Some(NoteTarget::Issue {
                project_id: *project_id,
                issue_iid: *issue_iid,
            }),
            Self::MergeRequestReplied {
                project_id,
                merge_request_iid,
                ..
            } => Some(NoteTarget::MergeRequest {
                project_id: *project_id,
                merge_request_iid: *merge_request_iid,
            }),
            Self::SnippetReplied {
                project_id,
                snippet_id,
                ..
            } => Some(NoteTarget::Snippet {
                project_id: *project_id,
                snippet_id: *snippet_id,
            }),
            Self::CommitReplied {
                project_id,
                commit_id,
                ..
            } => Some(NoteTarget::Commit {
                project_id: *project_id,
                commit_id: commit_id.clone(),
            }),
            _ => None,
        }
    }

    /// Commit chosen by a disambiguation answer, as a direct commit intent.
    pub fn select_commit(&self, answer: &str) -> Option<ReplyIntent> {
        let Self::CommitToReplySelected {
            base_url,
            project_id,
            commits,
            ..
        } = self
        else {
            return None;
        };
        commits
            .iter()
            .find(|commit| commit.matches(answer))
            .map(|commit| Self::CommitReplied {
                base_url: base_url.clone(),
                project_id: *project_id,
                commit_id: commit.id.clone(),
            })
    }
}

/// The one intent a chat currently honors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyBinding {
    pub message_id: MessageId,
    pub intent: ReplyIntent,
    /// Set for keyboard prompts whose answers arrive as plain messages.
    #[serde(default)]
    pub awaiting_user: Option<UserId>,
}

impl ReplyBinding {
    /// Private chats resume on any message; groups need a reply to the bound
    /// message or an answer from the prompted user.
    pub fn accepts(&self, message: &IncomingMessage) -> bool {
        if message.is_private {
            return true;
        }
        if message.reply_to_message_id == Some(self.message_id) {
            return true;
        }
        self.awaiting_user == Some(message.from.id)
    }
}

/// Intent parked while the user completes authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AfterAuthAction {
    pub chat_id: ChatId,
    pub intent: ReplyIntent,
    pub comment: String,
    pub comment_message_id: MessageId,
}

/// Exactly 64 hexadecimal characters after trimming.
pub fn is_valid_app_credential(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.len() == 64 && trimmed.chars().all(|ch| ch.is_ascii_hexdigit())
}

#[derive(Clone)]
pub struct ReplyStateStore {
    cache: Arc<dyn KeyedCache>,
}

impl ReplyStateStore {
    pub fn new(cache: Arc<dyn KeyedCache>) -> Self {
        Self { cache }
    }

    pub fn bind(&self, chat_id: ChatId, binding: &ReplyBinding) -> Result<()> {
        tracing::debug!(
            chat_id,
            message_id = binding.message_id,
            intent = binding.intent.as_str(),
            "binding reply intent"
        );
        set_json(
            self.cache.as_ref(),
            CacheScope::Chat(chat_id),
            REPLY_BINDING_NAME,
            binding,
            Some(REPLY_BINDING_TTL),
        )
    }

    pub fn binding(&self, chat_id: ChatId) -> Result<Option<ReplyBinding>> {
        get_json(
            self.cache.as_ref(),
            CacheScope::Chat(chat_id),
            REPLY_BINDING_NAME,
        )
    }

    pub fn clear_binding(&self, chat_id: ChatId) -> Result<bool> {
        self.cache
            .remove(CacheScope::Chat(chat_id), REPLY_BINDING_NAME)
    }

    pub fn set_after_auth(&self, user_id: UserId, action: &AfterAuthAction) -> Result<()> {
        set_json(
            self.cache.as_ref(),
            CacheScope::User(user_id),
            AFTER_AUTH_NAME,
            action,
            Some(AFTER_AUTH_TTL),
        )
    }

    /// Returns and removes the parked action.
    pub fn take_after_auth(&self, user_id: UserId) -> Result<Option<AfterAuthAction>> {
        let action = get_json::<AfterAuthAction>(
            self.cache.as_ref(),
            CacheScope::User(user_id),
            AFTER_AUTH_NAME,
        )?;
        if action.is_some() {
            self.cache
                .remove(CacheScope::User(user_id), AFTER_AUTH_NAME)?;
        }
        Ok(action)
    }

    pub fn remember_user(&self, user: &ChatUser) -> Result<()> {
        set_json(
            self.cache.as_ref(),
            CacheScope::User(user.id),
            CHAT_USER_NAME,
            user,
            None,
        )
    }

    pub fn known_user(&self, user_id: UserId) -> Result<Option<ChatUser>> {
        get_json(self.cache.as_ref(), CacheScope::User(user_id), CHAT_USER_NAME)
    }
}
