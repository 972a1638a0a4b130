//! Drives reply intents through authorization and into comment jobs.

use std::{sync::Arc, time::Duration};

use anyhow::Result;

use crate::{
    chat_transport::{
        ChatId, ChatTransport, ChatUser, KeyboardButton, MessageId, OutboundMessage, ReplyMarkup,
        SentMessage, UserId,
    },
    chat_update::IncomingMessage,
    gitlab_oauth::{OAuthProvider, TokenExchangeOutcome},
    job_queue::{JobKind, JobQueue},
    markup::{bold, escape_html},
    reply_intent::{
        is_valid_app_credential, AfterAuthAction, ReplyBinding, ReplyIntent,
        ReplyStateStore,
    },
};

pub const OAUTH_SUCCESS_TEXT: &str =
    "Great! Now you can reply issues, commits, merge requests and snippets";
pub const NICK_MAP_DELAY: Duration = Duration::from_secs(5);

/// Outcome of an authorization check. `Suspended` means the user has been
/// told what to do next and the caller should park its intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthGate {
    Authorized,
    Suspended,
}

pub struct ReplyEngine {
    transport: Arc<dyn ChatTransport>,
    oauth: Arc<dyn OAuthProvider>,
    jobs: JobQueue,
    state: ReplyStateStore,
    nick_map_delay: Duration,
}

impl ReplyEngine {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        oauth: Arc<dyn OAuthProvider>,
        jobs: JobQueue,
        state: ReplyStateStore,
    ) -> Self {
        Self {
            transport,
            oauth,
            jobs,
            state,
            nick_map_delay: NICK_MAP_DELAY,
        }
    }

    pub fn with_nick_map_delay(mut self, delay: Duration) -> Self {
        self.nick_map_delay = delay;
        self
    }

    pub fn state(&self) -> &ReplyStateStore {
        &self.state
    }

    /// Makes `intent` the chat's active reply target.
    pub fn bind(&self, chat_id: ChatId, message_id: MessageId, intent: ReplyIntent) -> Result<()> {
        self.state.bind(
            chat_id,
            &ReplyBinding {
                message_id,
                intent,
                awaiting_user: None,
            },
        )
    }

    /// Resumes the chat's bound intent with `message`. Returns false when no
    /// binding applies.
    pub async fn handle_message(&self, message: &IncomingMessage) -> Result<bool> {
        let Some(binding) = self.state.binding(message.chat_id)? else {
            return Ok(false);
        };
        if !binding.accepts(message) {
            tracing::debug!(
                chat_id = message.chat_id,
                bound_message_id = binding.message_id,
                "message does not target the bound reply"
            );
            return Ok(false);
        }
        if let Err(error) = self.state.remember_user(&message.from) {
            tracing::debug!(%error, user_id = message.from.id, "failed to remember chat user");
        }
        self.run_intent(message, binding.intent).await?;
        Ok(true)
    }

    async fn run_intent(&self, message: &IncomingMessage, intent: ReplyIntent) -> Result<()> {
        tracing::debug!(
            chat_id = message.chat_id,
            intent = intent.as_str(),
            "resuming reply intent"
        );
        match intent {
            ReplyIntent::HostedAppIdEntered { base_url } => {
                self.hosted_app_id_entered(message, base_url).await
            }
            ReplyIntent::HostedAppSecretEntered { base_url, app_id } => {
                self.hosted_app_secret_entered(message, base_url, app_id)
                    .await
            }
            ReplyIntent::CommitsReplied {
                base_url,
                project_id,
                commits,
            } => {
                let prompt = ReplyIntent::CommitToReplySelected {
                    base_url,
                    project_id,
                    commits,
                    comment: message.text.clone(),
                    comment_message_id: message.message_id,
                };
                self.prompt_commit_selection(message, prompt).await
            }
            selection @ ReplyIntent::CommitToReplySelected { .. } => {
                let ReplyIntent::CommitToReplySelected {
                    comment,
                    comment_message_id,
                    ..
                } = &selection
                else {
                    return Ok(());
                };
                match selection.select_commit(&message.text) {
                    Some(commit_intent) => {
                        self.dispatch_comment(
                            message.chat_id,
                            &message.from,
                            commit_intent,
                            comment.clone(),
                            *comment_message_id,
                        )
                        .await
                    }
                    None => self.prompt_commit_selection(message, selection.clone()).await,
                }
            }
            direct => {
                self.dispatch_comment(
                    message.chat_id,
                    &message.from,
                    direct,
                    message.text.clone(),
                    message.message_id,
                )
                .await
            }
        }
    }

    async fn prompt_commit_selection(
        &self,
        message: &IncomingMessage,
        prompt: ReplyIntent,
    ) -> Result<()> {
        let ReplyIntent::CommitToReplySelected { commits, .. } = &prompt else {
            return Ok(());
        };
        let buttons = commits
            .iter()
            .map(|commit| KeyboardButton {
                data: commit.id.clone(),
                label: commit.label.clone(),
            })
            .collect();
        let sent = self
            .transport
            .send_text(
                OutboundMessage::html(
                    message.chat_id,
                    format!(
                        "{} please specify commit to comment",
                        escape_html(&message.from.mention())
                    ),
                )
                .reply_to(message.message_id)
                .with_markup(ReplyMarkup::Keyboard {
                    buttons,
                    columns: 1,
                    one_time: true,
                }),
            )
            .await?;
        self.state.bind(
            message.chat_id,
            &ReplyBinding {
                message_id: sent.message_id,
                intent: prompt,
                awaiting_user: Some(message.from.id),
            },
        )
    }

    /// Enqueues the comment when authorized, otherwise parks it until the
    /// OAuth callback resumes it. Either way the comment message becomes the
    /// chat's reply target so the conversation can continue.
    async fn dispatch_comment(
        &self,
        chat_id: ChatId,
        from: &ChatUser,
        intent: ReplyIntent,
        comment: String,
        comment_message_id: MessageId,
    ) -> Result<()> {
        let Some(target) = intent.note_target() else {
            tracing::warn!(chat_id, intent = intent.as_str(), "intent has no comment target");
            return Ok(());
        };
        let base_url = intent.base_url().to_string();
        self.bind(chat_id, comment_message_id, intent.clone())?;
        if comment.trim().is_empty() {
            tracing::debug!(chat_id, "ignoring empty reply");
            return Ok(());
        }

        match self.must_be_authed(&base_url, chat_id, from).await? {
            AuthGate::Authorized => {
                let job_id = self.jobs.enqueue(JobKind::SendComment {
                    base_url,
                    user_id: from.id,
                    chat_id,
                    target,
                    body: comment,
                    comment_message_id,
                });
                tracing::info!(chat_id, job_id = %job_id, "queued gitlab comment");
            }
            AuthGate::Suspended => {
                self.state.set_after_auth(
                    from.id,
                    &AfterAuthAction {
                        chat_id,
                        intent,
                        comment,
                        comment_message_id,
                    },
                )?;
            }
        }
        Ok(())
    }

    async fn hosted_app_id_entered(&self, message: &IncomingMessage, base_url: String) -> Result<()> {
        let app_id = message.text.trim().to_string();
        if !is_valid_app_credential(&app_id) {
            tracing::debug!(chat_id = message.chat_id, "rejected application id");
            return self
                .send_bound_prompt(
                    message.chat_id,
                    format!(
                        "Looks like this {} is incorrect. Must be a 64 HEX symbols. Please try again",
                        bold("Application ID")
                    ),
                    ReplyIntent::HostedAppIdEntered { base_url },
                )
                .await;
        }
        self.send_bound_prompt(
            message.chat_id,
            format!("Great! Now write me the {} for this application", bold("Secret")),
            ReplyIntent::HostedAppSecretEntered { base_url, app_id },
        )
        .await
    }

    async fn hosted_app_secret_entered(
        &self,
        message: &IncomingMessage,
        base_url: String,
        app_id: String,
    ) -> Result<()> {
        let secret = message.text.trim().to_string();
        if !is_valid_app_credential(&secret) {
            return self
                .send_bound_prompt(
                    message.chat_id,
                    format!(
                        "Looks like this {} is incorrect. Must be a 64 HEX symbols. Please try again",
                        bold("Application Secret")
                    ),
                    ReplyIntent::HostedAppSecretEntered { base_url, app_id },
                )
                .await;
        }

        let outcome = match self
            .oauth
            .exchange_app_credentials(&base_url, &app_id, &secret)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(%error, base_url = %base_url, "application credential probe failed");
                TokenExchangeOutcome::Rejected(error.to_string())
            }
        };
        if outcome != TokenExchangeOutcome::InvalidGrant {
            tracing::info!(base_url = %base_url, ?outcome, "gitlab application credentials rejected");
            return self
                .send_bound_prompt(
                    message.chat_id,
                    format!(
                        "Application ID or Secret is incorrect. Please try again. Enter {}",
                        bold("Application ID")
                    ),
                    ReplyIntent::HostedAppIdEntered { base_url },
                )
                .await;
        }

        self.oauth
            .save_app_credentials(&base_url, &app_id, &secret)?;
        tracing::info!(base_url = %base_url, "registered gitlab oauth application");
        self.must_be_authed(&base_url, message.chat_id, &message.from)
            .await?;
        Ok(())
    }

    async fn send_bound_prompt(
        &self,
        chat_id: ChatId,
        text: String,
        intent: ReplyIntent,
    ) -> Result<()> {
        let sent = self
            .transport
            .send_text(OutboundMessage::html(chat_id, text).with_markup(ReplyMarkup::ForceReply))
            .await?;
        self.bind(chat_id, sent.message_id, intent)
    }

    /// Checks that `user` can post to `base_url`. When not, sends exactly one
    /// message describing the next step and returns `Suspended`.
    pub async fn must_be_authed(
        &self,
        base_url: &str,
        chat_id: ChatId,
        user: &ChatUser,
    ) -> Result<AuthGate> {
        if !self.oauth.is_configured(base_url)? {
            let text = format!(
                "To be able to use interactive replies in Telegram, first you need to add oauth application on your hosted GitLab instance (admin privileges required): {}/admin/applications/new\nAdd application with any name (e.g. Telegram) and specify this {}: \n{}\n\nAfter you press {} you will receive app info. First, send me the {}",
                escape_html(base_url.trim_end_matches('/')),
                bold("Redirect URI"),
                escape_html(&self.oauth.redirect_uri()),
                bold("Submit"),
                bold("Application ID"),
            );
            let sent = self
                .send_to_user(
                    user.id,
                    chat_id,
                    OutboundMessage::html(user.id, text).with_markup(ReplyMarkup::ForceReply),
                )
                .await?;
            self.bind(
                sent.chat_id,
                sent.message_id,
                ReplyIntent::HostedAppIdEntered {
                    base_url: base_url.to_string(),
                },
            )?;
            return Ok(AuthGate::Suspended);
        }

        if !self.oauth.is_user_authorized(base_url, user.id)? {
            let url = self.oauth.authorization_url(base_url, user.id)?;
            self.send_to_user(
                user.id,
                chat_id,
                OutboundMessage::plain(
                    user.id,
                    format!("You need to authorize me to use interactive replies: {url}"),
                ),
            )
            .await?;
            return Ok(AuthGate::Suspended);
        }
        Ok(AuthGate::Authorized)
    }

    /// Sends to the user's private chat, falling back to the originating chat
    /// when the user has not started a conversation with the bot.
    async fn send_to_user(
        &self,
        user_id: UserId,
        origin_chat_id: ChatId,
        message: OutboundMessage,
    ) -> Result<SentMessage> {
        match self.transport.send_text(message.clone()).await {
            Ok(sent) => Ok(sent),
            Err(error) if origin_chat_id != user_id => {
                tracing::debug!(%error, user_id, "private message failed; using origin chat");
                self.transport
                    .send_text(OutboundMessage {
                        chat_id: origin_chat_id,
                        ..message
                    })
                    .await
            }
            Err(error) => Err(error),
        }
    }

    /// Handles a completed OAuth redirect for `user_id` on `base_url`.
    pub async fn on_oauth_success(&self, user_id: UserId, base_url: &str) -> Result<()> {
        let handle = self
            .state
            .known_user(user_id)?
            .and_then(|user| user.username)
            .filter(|username| !username.is_empty());
        if let Some(chat_handle) = handle {
            self.jobs.schedule(
                JobKind::CacheNickMap {
                    base_url: base_url.to_string(),
                    user_id,
                    chat_handle,
                },
                self.nick_map_delay,
            );
        }
        self.transport
            .send_text(OutboundMessage::plain(user_id, OAUTH_SUCCESS_TEXT))
            .await?;
        self.resume_after_auth(user_id).await?;
        Ok(())
    }

    /// Re-runs the intent parked by an authorization suspension.
    pub async fn resume_after_auth(&self, user_id: UserId) -> Result<bool> {
        let Some(action) = self.state.take_after_auth(user_id)? else {
            return Ok(false);
        };
        let user = self.state.known_user(user_id)?.unwrap_or(ChatUser {
            id: user_id,
            username: None,
            first_name: String::new(),
        });
        tracing::info!(
            user_id,
            chat_id = action.chat_id,
            intent = action.intent.as_str(),
            "resuming reply after authorization"
        );
        self.dispatch_comment(
            action.chat_id,
            &user,
            action.intent,
            action.comment,
            action.comment_message_id,
        )
        .await?;
        Ok(true)
    }
}
