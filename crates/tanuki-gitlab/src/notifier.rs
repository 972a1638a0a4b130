//! Entry point that wires the GitLab notification engine together.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tanuki_core::KeyedCache;
use thiserror::Error;

use crate::{
    chat_commands::{ChatCommandRouter, ChatUpdateOutcome, HookRegistry},
    chat_transport::{ChatId, ChatTransport},
    chat_update::ChatUpdate,
    comment_jobs::GitlabJobHandler,
    correlation_store::CorrelationStore,
    gitlab_api_client::CommentApi,
    gitlab_oauth::{CompletedAuthorization, OAuthProvider, TokenExchangeOutcome},
    job_queue::{JobQueue, JobQueueConfig, JobQueueHealthSnapshot},
    nickname_cache::NicknameCache,
    notification_settings::{CacheSettingsStore, SettingsStore},
    reply_engine::ReplyEngine,
    reply_intent::ReplyStateStore,
    webhook_payload::{parse_gitlab_webhook, WebhookParseError},
    webhook_renderer::{RendererConfig, WebhookOutcome, WebhookRenderer},
};

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub renderer: RendererConfig,
    pub jobs: JobQueueConfig,
    /// Salt for per-chat webhook tokens.
    pub hook_secret: String,
    /// Externally reachable base URL of the relay.
    pub public_url: String,
    /// Delay before a freshly authorized user's nickname is cached.
    pub nick_map_delay: Duration,
}

#[derive(Debug, Error)]
pub enum WebhookDeliveryError {
    #[error("unknown webhook token")]
    UnknownToken,
    #[error("malformed gitlab webhook: {0}")]
    Malformed(#[from] WebhookParseError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookDelivery {
    pub chat_id: ChatId,
    pub outcome: WebhookOutcome,
}

pub struct GitlabNotifier {
    hooks: HookRegistry,
    renderer: WebhookRenderer,
    router: ChatCommandRouter,
    replies: Arc<ReplyEngine>,
    oauth: Arc<dyn OAuthProvider>,
    jobs: JobQueue,
}

impl GitlabNotifier {
    pub fn new(
        config: NotifierConfig,
        transport: Arc<dyn ChatTransport>,
        oauth: Arc<dyn OAuthProvider>,
        comments: Arc<dyn CommentApi>,
        cache: Arc<dyn KeyedCache>,
    ) -> Self {
        let correlations = CorrelationStore::new(cache.clone());
        let nicknames = NicknameCache::new(cache.clone());
        let settings: Arc<dyn SettingsStore> = Arc::new(CacheSettingsStore::new(cache.clone()));
        let state = ReplyStateStore::new(cache.clone());
        let hooks = HookRegistry::new(cache.clone(), config.hook_secret, config.public_url);

        let handler = GitlabJobHandler::new(
            comments,
            oauth.clone(),
            correlations.clone(),
            nicknames.clone(),
            cache,
        );
        let jobs = JobQueue::new(config.jobs, Arc::new(handler));
        let replies = Arc::new(ReplyEngine::new(
            transport.clone(),
            oauth.clone(),
            jobs.clone(),
            state.clone(),
        )
        .with_nick_map_delay(config.nick_map_delay));
        let renderer = WebhookRenderer::new(
            config.renderer,
            transport.clone(),
            correlations,
            nicknames,
            settings.clone(),
            state,
        );
        let router = ChatCommandRouter::new(transport, settings, hooks.clone(), replies.clone());
        Self {
            hooks,
            renderer,
            router,
            replies,
            oauth,
            jobs,
        }
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Handles one GitLab delivery addressed to the chat behind `token`.
    pub async fn handle_webhook(
        &self,
        token: &str,
        body: &str,
    ) -> Result<WebhookDelivery, WebhookDeliveryError> {
        let chat_id = self
            .hooks
            .resolve(token)?
            .ok_or(WebhookDeliveryError::UnknownToken)?;
        let webhook = match parse_gitlab_webhook(body) {
            Ok(webhook) => webhook,
            Err(error) => {
                tracing::warn!(
                    chat_id,
                    reason_code = error.reason_code().as_str(),
                    %error,
                    "dropping malformed gitlab webhook"
                );
                return Err(error.into());
            }
        };
        let outcome = self.renderer.handle(chat_id, &webhook).await?;
        Ok(WebhookDelivery { chat_id, outcome })
    }

    pub async fn handle_chat_update(&self, update: &ChatUpdate) -> Result<ChatUpdateOutcome> {
        self.router.handle_update(update).await
    }

    /// Finishes the OAuth redirect round-trip. `None` means the `state` was
    /// not issued by this relay or has already been used.
    pub async fn complete_oauth(
        &self,
        state: &str,
        code: &str,
    ) -> Result<Option<CompletedAuthorization>> {
        let Some(completed) = self.oauth.complete_authorization(state, code).await? else {
            tracing::warn!(
                reason_code = "oauth_unknown_state",
                "rejecting oauth callback with unknown state"
            );
            return Ok(None);
        };
        match &completed.outcome {
            TokenExchangeOutcome::Success(_) => {
                self.replies
                    .on_oauth_success(completed.user_id, &completed.base_url)
                    .await?
            }
            TokenExchangeOutcome::InvalidGrant | TokenExchangeOutcome::Rejected(_) => {
                tracing::warn!(
                    user_id = completed.user_id,
                    "gitlab oauth authorization was not accepted"
                );
            }
        }
        Ok(Some(completed))
    }

    pub fn job_health(&self) -> JobQueueHealthSnapshot {
        self.jobs.inspect_health()
    }

    pub async fn wait_for_jobs(&self, timeout: Duration) -> bool {
        self.jobs.wait_until_idle(timeout).await
    }
}
