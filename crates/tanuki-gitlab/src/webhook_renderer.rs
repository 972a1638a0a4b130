//! Classifies GitLab webhooks and turns them into chat notifications.
//!
//! Every delivery resolves to one [`WebhookOutcome`]: a new message, a reply
//! threaded under an earlier notification, an edit of an earlier push
//! notification, a deliberate suppression, or a dropped duplicate.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use url::Url;

use crate::{
    chat_transport::{ChatId, ChatTransport, MessageId, OutboundMessage},
    correlation_store::{CorrelationStore, NotificationRecord},
    event_key::{EventKey, NoteRef},
    markup::{bold, escape_html, link, short_sha, LinkPreview},
    nickname_cache::NicknameCache,
    notification_settings::{NotificationAction, NotificationCategory, SettingsStore},
    reply_intent::{CommitChoice, ReplyBinding, ReplyIntent, ReplyStateStore},
    webhook_payload::{
        BuildEvent, BuildStatus, GitlabWebhook, IssueEvent, MergeRequestEvent, NoteEvent,
        NoteableKind, ObjectAttributes, ProjectInfo, PushEvent, Repository, WebhookUser,
    },
};

const WEBHOOK_EMPTY_URL_REASON: &str = "webhook_empty_url";
const SHORT_SHA_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    pub default_base_url: String,
    /// Upper bound on waiting for a push notification before a build event
    /// is rendered standalone.
    pub build_correlation_wait: Duration,
    pub build_correlation_poll: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            default_base_url: "https://gitlab.com".to_string(),
            build_correlation_wait: Duration::from_millis(1_000),
            build_correlation_poll: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    SettingsDisabled,
    /// Pending and running builds only ever annotate an existing push.
    BuildProgressWithoutParent,
    UnknownBuildStatus,
}

impl SuppressReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SettingsDisabled => "settings_disabled",
            Self::BuildProgressWithoutParent => "build_progress_without_parent",
            Self::UnknownBuildStatus => "unknown_build_status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Sent { message_id: MessageId },
    Threaded { message_id: MessageId, parent_message_id: MessageId },
    Edited { message_id: MessageId },
    Suppressed(SuppressReason),
    Duplicate,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Threaded { .. } => "threaded",
            Self::Edited { .. } => "edited",
            Self::Suppressed(_) => "suppressed",
            Self::Duplicate => "duplicate",
        }
    }
}

pub struct WebhookRenderer {
    config: RendererConfig,
    transport: Arc<dyn ChatTransport>,
    correlations: CorrelationStore,
    nicknames: NicknameCache,
    settings: Arc<dyn SettingsStore>,
    replies: ReplyStateStore,
}

/// Message about to be sent plus the state it registers.
struct Notification {
    text: String,
    reply_to: Option<MessageId>,
    web_preview: bool,
    event_key: Option<EventKey>,
    intent: Option<ReplyIntent>,
}

impl Notification {
    fn new(text: String) -> Self {
        Self {
            text,
            reply_to: None,
            web_preview: false,
            event_key: None,
            intent: None,
        }
    }

    fn reply_to(mut self, parent: Option<MessageId>) -> Self {
        self.reply_to = parent;
        self
    }

    fn with_web_preview(mut self) -> Self {
        self.web_preview = true;
        self
    }

    fn keyed(mut self, key: EventKey) -> Self {
        self.event_key = Some(key);
        self
    }

    fn bind(mut self, intent: ReplyIntent) -> Self {
        self.intent = Some(intent);
        self
    }
}

impl WebhookRenderer {
    pub fn new(
        config: RendererConfig,
        transport: Arc<dyn ChatTransport>,
        correlations: CorrelationStore,
        nicknames: NicknameCache,
        settings: Arc<dyn SettingsStore>,
        replies: ReplyStateStore,
    ) -> Self {
        Self {
            config,
            transport,
            correlations,
            nicknames,
            settings,
            replies,
        }
    }

    pub async fn handle(&self, chat_id: ChatId, webhook: &GitlabWebhook) -> Result<WebhookOutcome> {
        let base_url = self.resolve_base_url(chat_id, webhook);
        let outcome = match webhook {
            GitlabWebhook::Push(push) => self.handle_push(chat_id, &base_url, push).await?,
            GitlabWebhook::TagPush(push) => self.handle_tag_push(chat_id, push).await?,
            GitlabWebhook::Issue(issue) => self.handle_issue(chat_id, &base_url, issue).await?,
            GitlabWebhook::MergeRequest(merge_request) => {
                self.handle_merge_request(chat_id, &base_url, merge_request)
                    .await?
            }
            GitlabWebhook::Note(note) => self.handle_note(chat_id, &base_url, note).await?,
            GitlabWebhook::Build(build) => self.handle_build(chat_id, build).await?,
        };
        tracing::info!(
            chat_id,
            kind = webhook.kind(),
            outcome = outcome.as_str(),
            "gitlab webhook handled"
        );
        Ok(outcome)
    }

    fn resolve_base_url(&self, chat_id: ChatId, webhook: &GitlabWebhook) -> String {
        let resolved = webhook
            .base_url_candidates()
            .into_iter()
            .find_map(url_origin);
        match resolved {
            Some(base_url) => base_url,
            None => {
                tracing::warn!(
                    chat_id,
                    kind = webhook.kind(),
                    reason_code = WEBHOOK_EMPTY_URL_REASON,
                    "gitlab webhook carries no instance url; using default"
                );
                self.config.default_base_url.clone()
            }
        }
    }

    fn mention(&self, username: &str, email: &str) -> String {
        self.nicknames.mention(username, email)
    }

    fn is_enabled(
        &self,
        chat_id: ChatId,
        category: NotificationCategory,
        action: NotificationAction,
    ) -> Result<bool> {
        Ok(self.settings.load(chat_id)?.is_enabled(category, action))
    }

    fn find_parent(&self, chat_id: ChatId, key: &EventKey) -> Result<Option<NotificationRecord>> {
        self.correlations.find(chat_id, key)
    }

    async fn send(&self, chat_id: ChatId, notification: Notification) -> Result<WebhookOutcome> {
        let mut message = OutboundMessage::html(chat_id, notification.text.clone());
        if let Some(parent) = notification.reply_to {
            message = message.reply_to(parent);
        }
        if notification.web_preview {
            message = message.enable_web_preview();
        }
        let sent = self.transport.send_text(message).await?;
        if let Some(key) = notification.event_key.as_ref() {
            self.correlations.record(
                chat_id,
                key,
                &NotificationRecord::new(sent.message_id, notification.text),
            )?;
        }
        if let Some(intent) = notification.intent {
            self.replies.bind(
                chat_id,
                &ReplyBinding {
                    message_id: sent.message_id,
                    intent,
                    awaiting_user: None,
                },
            )?;
        }
        Ok(match notification.reply_to {
            Some(parent_message_id) => WebhookOutcome::Threaded {
                message_id: sent.message_id,
                parent_message_id,
            },
            None => WebhookOutcome::Sent {
                message_id: sent.message_id,
            },
        })
    }

    async fn handle_push(
        &self,
        chat_id: ChatId,
        base_url: &str,
        push: &PushEvent,
    ) -> Result<WebhookOutcome> {
        let branch = push.short_ref();
        let homepage = push.repository.homepage.trim_end_matches('/');
        let pusher = self.mention(pusher_username(push), &push.user_email);
        let tree_url = format!("{homepage}/tree/{}", query_escape(branch));

        let Some(last_commit) = push.commits.last() else {
            let label = format!("{}/{branch}", push.repository.name);
            let text = if push.is_branch_deleted() {
                format!("{pusher} deleted branch {}", bold(&label))
            } else {
                format!("{pusher} created branch {}", link(&label, &tree_url))
            };
            return self.send(chat_id, Notification::new(text)).await;
        };

        let mut lines = Vec::with_capacity(push.commits.len());
        let (mut added, mut modified, mut removed) = (0_usize, 0_usize, 0_usize);
        for commit in &push.commits {
            let foreign_author =
                commit.author.email != push.user_email && commit.author.name != push.user_name;
            let prefix = if foreign_author {
                format!(
                    "{}: ",
                    self.mention(&commit.author.name, &commit.author.email)
                )
            } else {
                String::new()
            };
            lines.push(format!(
                "{prefix}{}",
                link(commit.message.trim_end_matches('\n'), &commit.url)
            ));
            added += commit.added.len();
            modified += commit.modified.len();
            removed += commit.removed.len();
        }
        let files = file_change_summary(added, modified, removed);

        let preview = if push.commits.len() > 1 {
            LinkPreview::new(
                format!("{} commits", push.commits.len()),
                format!(
                    "@{} ... @{}",
                    short_sha(&push.before, SHORT_SHA_LEN),
                    short_sha(&push.after, SHORT_SHA_LEN)
                ),
                files,
                format!("{homepage}/compare/{}...{}", push.before, push.after),
            )
        } else {
            LinkPreview::new(
                "Commit",
                format!("@{}", short_sha(&push.after, SHORT_SHA_LEN)),
                files,
                last_commit.url.clone(),
            )
        };
        let destination = push
            .project_path()
            .unwrap_or(push.repository.name.as_str())
            .to_string();
        let text = format!(
            "{pusher} {} to {}\n{}",
            link("pushed", &self.transport.preview_link(&preview)),
            link(&format!("{destination}/{branch}"), &tree_url),
            lines.join("\n")
        );

        let intent = if push.commits.len() == 1 {
            ReplyIntent::CommitReplied {
                base_url: base_url.to_string(),
                project_id: push.project_id,
                commit_id: last_commit.id.clone(),
            }
        } else {
            ReplyIntent::CommitsReplied {
                base_url: base_url.to_string(),
                project_id: push.project_id,
                commits: CommitChoice::for_commits(
                    push.commits
                        .iter()
                        .map(|commit| (commit.id.as_str(), commit.message.as_str())),
                ),
            }
        };
        self.send(
            chat_id,
            Notification::new(text)
                .with_web_preview()
                .keyed(EventKey::commit(last_commit.id.clone()))
                .bind(intent),
        )
        .await
    }

    async fn handle_tag_push(&self, chat_id: ChatId, push: &PushEvent) -> Result<WebhookOutcome> {
        let homepage = push.repository.homepage.trim_end_matches('/');
        let name = push.short_ref();
        let destination = push
            .project_path()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} / {}", push.user_name, push.repository.name));
        let pusher = self.mention(pusher_username(push), &push.user_email);
        let kind = push.ref_kind();
        let text = if push.is_branch_deleted() {
            format!(
                "{pusher} deleted {} at {}",
                bold(&format!("{kind} {name}")),
                link(&destination, homepage)
            )
        } else {
            format!(
                "{pusher} pushed new {} at {}",
                link(
                    &format!("{kind} {name}"),
                    &format!("{homepage}/tree/{}", query_escape(name))
                ),
                link(&destination, homepage)
            )
        };
        self.send(chat_id, Notification::new(text)).await
    }

    async fn handle_issue(
        &self,
        chat_id: ChatId,
        base_url: &str,
        issue: &IssueEvent,
    ) -> Result<WebhookOutcome> {
        let attributes = &issue.object_attributes;
        let action = issue_action(&attributes.action);
        if !self.is_enabled(chat_id, NotificationCategory::Issues, action)? {
            return Ok(WebhookOutcome::Suppressed(SuppressReason::SettingsDisabled));
        }
        let key = EventKey::Issue(attributes.id);
        let intent = ReplyIntent::IssueReplied {
            base_url: base_url.to_string(),
            project_id: attributes.project_id,
            issue_iid: attributes.iid,
        };
        let actor = self.mention(&issue.user.username, &issue.user.email);
        let destination = destination_label(issue.project.as_ref(), &issue.user, &issue.repository);

        if action == NotificationAction::Open {
            let text = opened_text(
                &actor,
                "issue",
                attributes,
                &destination,
                &issue.repository,
            );
            return self
                .send(chat_id, Notification::new(text).keyed(key).bind(intent))
                .await;
        }

        let verb = match attributes.action.as_str() {
            "reopen" => "reopened",
            "close" => "closed",
            _ => "updated",
        };
        match self.find_parent(chat_id, &key)? {
            Some(parent) => {
                let text = format!("{} by {actor}", bold(verb));
                self.send(
                    chat_id,
                    Notification::new(text)
                        .reply_to(Some(parent.message_id))
                        .bind(intent),
                )
                .await
            }
            None => {
                let preview = LinkPreview::new(
                    "Issue",
                    attributes.title.clone(),
                    destination,
                    attributes.url.clone(),
                );
                let text = format!(
                    "{} by {actor}",
                    link(verb, &self.transport.preview_link(&preview))
                );
                self.send(
                    chat_id,
                    Notification::new(text).with_web_preview().bind(intent),
                )
                .await
            }
        }
    }

    async fn handle_merge_request(
        &self,
        chat_id: ChatId,
        base_url: &str,
        merge_request: &MergeRequestEvent,
    ) -> Result<WebhookOutcome> {
        let attributes = &merge_request.object_attributes;
        let action = merge_request_action(&attributes.action);
        if !self.is_enabled(chat_id, NotificationCategory::MergeRequests, action)? {
            return Ok(WebhookOutcome::Suppressed(SuppressReason::SettingsDisabled));
        }
        let key = EventKey::MergeRequest(attributes.id);
        let intent = ReplyIntent::MergeRequestReplied {
            base_url: base_url.to_string(),
            project_id: attributes.project_id,
            merge_request_iid: attributes.iid,
        };
        let actor = self.mention(&merge_request.user.username, &merge_request.user.email);

        if attributes.action == "open" {
            let destination = destination_label(
                merge_request.project.as_ref(),
                &merge_request.user,
                &merge_request.repository,
            );
            let text = opened_text(
                &actor,
                "merge request",
                attributes,
                &destination,
                &merge_request.repository,
            );
            return self
                .send(chat_id, Notification::new(text).keyed(key).bind(intent))
                .await;
        }

        let state = escape_html(&attributes.state);
        match self.find_parent(chat_id, &key)? {
            Some(parent) => {
                let text = format!(
                    "{} {state} by {actor}",
                    link("merge request", &attributes.url)
                );
                self.send(
                    chat_id,
                    Notification::new(text)
                        .reply_to(Some(parent.message_id))
                        .bind(intent),
                )
                .await
            }
            None => {
                let preview = LinkPreview::new(
                    "Merge Request",
                    attributes.title.clone(),
                    attributes.description.clone(),
                    attributes.url.clone(),
                );
                let text = format!(
                    "{} {state} by {actor}",
                    link("Merge request", &self.transport.preview_link(&preview))
                );
                self.send(
                    chat_id,
                    Notification::new(text).with_web_preview().bind(intent),
                )
                .await
            }
        }
    }

    async fn handle_note(
        &self,
        chat_id: ChatId,
        base_url: &str,
        note: &NoteEvent,
    ) -> Result<WebhookOutcome> {
        let attributes = &note.object_attributes;
        let project_id = note.project_id();
        let kind = NoteableKind::parse(&attributes.noteable_type);
        let note_ref = match kind {
            NoteableKind::Commit => NoteRef::created_at(&attributes.created_at),
            _ => NoteRef::Id(attributes.id),
        };
        let note_key = EventKey::note(project_id, note_ref);
        if self.correlations.contains(chat_id, &note_key)? {
            tracing::debug!(chat_id, event_key = %note_key, "dropping duplicate note delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        let origin = format!("{} / {}", note.user.username, note.repository.name);
        let base_url = base_url.to_string();
        let (parent_key, preview, intent) = match &kind {
            NoteableKind::Commit => (
                Some(EventKey::commit(attributes.commit_id.clone())),
                Some(LinkPreview::new(
                    "Commit",
                    format!("@{}", short_sha(&attributes.commit_id, SHORT_SHA_LEN)),
                    origin,
                    attributes.url.clone(),
                )),
                Some(ReplyIntent::CommitReplied {
                    base_url,
                    project_id,
                    commit_id: attributes.commit_id.clone(),
                }),
            ),
            NoteableKind::MergeRequest => match &note.merge_request {
                Some(merge_request) => (
                    Some(EventKey::MergeRequest(merge_request.id)),
                    Some(LinkPreview::new(
                        "Merge Request",
                        merge_request.title.clone(),
                        origin,
                        attributes.url.clone(),
                    )),
                    Some(ReplyIntent::MergeRequestReplied {
                        base_url,
                        project_id,
                        merge_request_iid: merge_request.iid,
                    }),
                ),
                None => (None, None, None),
            },
            NoteableKind::Issue => match &note.issue {
                Some(issue) => (
                    Some(EventKey::Issue(issue.id)),
                    Some(LinkPreview::new(
                        "Issue",
                        issue.title.clone(),
                        origin,
                        attributes.url.clone(),
                    )),
                    Some(ReplyIntent::IssueReplied {
                        base_url,
                        project_id,
                        issue_iid: issue.iid,
                    }),
                ),
                None => (None, None, None),
            },
            NoteableKind::Snippet => match &note.snippet {
                Some(snippet) => (
                    Some(EventKey::Snippet(snippet.id)),
                    Some(LinkPreview::new(
                        "Snippet",
                        snippet.title.clone(),
                        origin,
                        attributes.url.clone(),
                    )),
                    Some(ReplyIntent::SnippetReplied {
                        base_url,
                        project_id,
                        snippet_id: snippet.id,
                    }),
                ),
                None => (None, None, None),
            },
            NoteableKind::Other(_) => (None, None, None),
        };

        let parent = match parent_key.as_ref() {
            Some(key) => self.find_parent(chat_id, key)?,
            None => None,
        };
        let actor = self.mention(&note.user.username, &note.user.email);
        let body = escape_html(&attributes.note);
        let mut notification = match parent {
            Some(parent) => Notification::new(format!("{actor}: {body}"))
                .reply_to(Some(parent.message_id)),
            None => {
                let href = preview
                    .as_ref()
                    .map(|preview| self.transport.preview_link(preview))
                    .unwrap_or_else(|| attributes.url.clone());
                Notification::new(format!(
                    "{actor} commented on {}: {body}",
                    link(&kind.label(), &href)
                ))
                .with_web_preview()
            }
        };
        notification = notification.keyed(note_key);
        if let Some(intent) = intent {
            notification = notification.bind(intent);
        }
        self.send(chat_id, notification).await
    }

    async fn wait_for_parent(
        &self,
        chat_id: ChatId,
        key: &EventKey,
    ) -> Result<Option<NotificationRecord>> {
        let deadline = tokio::time::Instant::now() + self.config.build_correlation_wait;
        let poll = self
            .config
            .build_correlation_poll
            .max(Duration::from_millis(1));
        loop {
            if let Some(record) = self.find_parent(chat_id, key)? {
                return Ok(Some(record));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    async fn handle_build(&self, chat_id: ChatId, build: &BuildEvent) -> Result<WebhookOutcome> {
        let status = BuildStatus::parse(&build.build_status);
        if matches!(status, BuildStatus::Other(_)) {
            tracing::debug!(chat_id, status = %build.build_status, "ignoring build status");
            return Ok(WebhookOutcome::Suppressed(SuppressReason::UnknownBuildStatus));
        }
        let key = EventKey::commit(build.sha.clone());
        let parent = self.wait_for_parent(chat_id, &key).await?;

        if parent.is_some() {
            let line = self.build_status_line(build, &status, None);
            if let Some(record) =
                self.correlations
                    .append_build_line(chat_id, &key, build.build_id, &line)?
            {
                self.transport
                    .edit_text(chat_id, record.message_id, &record.rendered_text(), true)
                    .await?;
                return Ok(WebhookOutcome::Edited {
                    message_id: record.message_id,
                });
            }
        }

        let send = match status {
            BuildStatus::Pending | BuildStatus::Running => {
                return Ok(WebhookOutcome::Suppressed(
                    SuppressReason::BuildProgressWithoutParent,
                ));
            }
            BuildStatus::Failed if build.build_allow_failure => true,
            BuildStatus::Failed => {
                self.is_enabled(chat_id, NotificationCategory::Ci, NotificationAction::Fail)?
            }
            BuildStatus::Success => {
                self.is_enabled(chat_id, NotificationCategory::Ci, NotificationAction::Success)?
            }
            BuildStatus::Canceled => {
                self.is_enabled(chat_id, NotificationCategory::Ci, NotificationAction::Cancel)?
            }
            BuildStatus::Other(_) => false,
        };
        if !send {
            return Ok(WebhookOutcome::Suppressed(SuppressReason::SettingsDisabled));
        }

        let homepage = build.repository.homepage.trim_end_matches('/');
        let owner = homepage.rsplit('/').nth(1).unwrap_or_default();
        let preview = LinkPreview::new(
            "Commit",
            format!("@{}", short_sha(&build.sha, SHORT_SHA_LEN)),
            format!("{owner} / {}", build.repository.name),
            format!("{homepage}/commit/{}", build.sha),
        );
        let commit_link = link("Commit", &self.transport.preview_link(&preview));
        let text = self.build_status_line(build, &status, Some(&commit_link));
        self.send(chat_id, Notification::new(text).with_web_preview())
            .await
    }

    fn build_status_line(
        &self,
        build: &BuildEvent,
        status: &BuildStatus,
        commit_link: Option<&str>,
    ) -> String {
        let homepage = build.repository.homepage.trim_end_matches('/');
        let mut label = link(
            &capitalize(&build.build_stage),
            &format!("{homepage}/builds/{}", build.build_id),
        );
        if !build.build_stage.eq_ignore_ascii_case(&build.build_name) {
            label.push_str(&format!(" #{}", escape_html(&build.build_name)));
        }
        let subject = match commit_link {
            Some(commit) => format!("{commit} {label}"),
            None => label,
        };
        let duration = build.build_duration;
        match status {
            BuildStatus::Pending => format!("⏳ CI: {subject} is pending"),
            BuildStatus::Running => format!("⚙ CI: {subject} is running"),
            BuildStatus::Success => format!("✅ CI: {subject} succeeded after {duration:.1} sec"),
            BuildStatus::Failed if build.build_allow_failure => format!(
                "❕ CI: {subject} failed after {duration:.1} sec (allowed to fail)"
            ),
            BuildStatus::Failed => format!("‼️ CI: {subject} failed after {duration:.1} sec"),
            BuildStatus::Canceled => format!(
                "🔚 CI: {subject} canceled by {} after {duration:.1} sec",
                self.mention(&build.user.username, &build.user.email)
            ),
            BuildStatus::Other(raw) => format!("CI: {subject} is {}", escape_html(raw)),
        }
    }
}

fn opened_text(
    actor: &str,
    noun: &str,
    attributes: &ObjectAttributes,
    destination: &str,
    repository: &Repository,
) -> String {
    let mut text = format!(
        "{actor} {} {} at {}:\n{}",
        escape_html(&attributes.state),
        link(noun, &attributes.url),
        link(destination, &repository.homepage),
        bold(&attributes.title)
    );
    if !attributes.description.trim().is_empty() {
        text.push('\n');
        text.push_str(&escape_html(&attributes.description));
    }
    text
}

fn issue_action(raw: &str) -> NotificationAction {
    match raw {
        "open" => NotificationAction::Open,
        "close" => NotificationAction::Close,
        "reopen" => NotificationAction::Reopen,
        _ => NotificationAction::Update,
    }
}

fn merge_request_action(raw: &str) -> NotificationAction {
    match raw {
        "open" | "reopen" => NotificationAction::Open,
        "close" => NotificationAction::Close,
        "merge" => NotificationAction::Merge,
        _ => NotificationAction::Update,
    }
}

fn pusher_username(push: &PushEvent) -> &str {
    if push.user_username.is_empty() {
        &push.user_name
    } else {
        &push.user_username
    }
}

fn destination_label(
    project: Option<&ProjectInfo>,
    user: &WebhookUser,
    repository: &Repository,
) -> String {
    project
        .map(|project| project.path_with_namespace.as_str())
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} / {}", user.username, repository.name))
}

fn file_change_summary(added: usize, modified: usize, removed: usize) -> String {
    let mut summary = String::new();
    if modified > 0 {
        summary.push_str(&format!("{modified} files modified"));
    }
    for (count, verb) in [(added, "added"), (removed, "removed")] {
        if count == 0 {
            continue;
        }
        if summary.is_empty() {
            summary.push_str(&format!("{count} files {verb}"));
        } else {
            summary.push_str(&format!(" {count} {verb}"));
        }
    }
    summary
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn query_escape(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

fn url_origin(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let origin = parsed.origin();
    origin
        .is_tuple()
        .then(|| origin.ascii_serialization())
}
