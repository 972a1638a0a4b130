//! Executes queued GitLab jobs on behalf of chat users.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tanuki_core::{get_json, set_json, CacheScope, KeyedCache};

use crate::{
    chat_transport::UserId,
    correlation_store::CorrelationStore,
    event_key::EventKey,
    gitlab_api_client::{CommentApi, GitlabUser},
    gitlab_oauth::OAuthProvider,
    job_queue::{JobHandler, JobKind},
    nickname_cache::NicknameCache,
};

const CURRENT_USER_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub struct GitlabJobHandler {
    api: Arc<dyn CommentApi>,
    oauth: Arc<dyn OAuthProvider>,
    correlations: CorrelationStore,
    nicknames: NicknameCache,
    cache: Arc<dyn KeyedCache>,
}

impl GitlabJobHandler {
    pub fn new(
        api: Arc<dyn CommentApi>,
        oauth: Arc<dyn OAuthProvider>,
        correlations: CorrelationStore,
        nicknames: NicknameCache,
        cache: Arc<dyn KeyedCache>,
    ) -> Self {
        Self {
            api,
            oauth,
            correlations,
            nicknames,
            cache,
        }
    }

    fn access_token(&self, base_url: &str, user_id: UserId) -> Result<String> {
        self.oauth
            .access_token(base_url, user_id)?
            .with_context(|| format!("user {user_id} has no gitlab token for {base_url}"))
    }

    async fn current_user(&self, base_url: &str, user_id: UserId) -> Result<GitlabUser> {
        let cached =
            get_json::<GitlabUser>(self.cache.as_ref(), CacheScope::User(user_id), "me")?;
        if let Some(user) = cached.filter(|user| user.id > 0) {
            return Ok(user);
        }
        let token = self.access_token(base_url, user_id)?;
        let user = self.api.current_user(base_url, &token).await?;
        set_json(
            self.cache.as_ref(),
            CacheScope::User(user_id),
            "me",
            &user,
            Some(CURRENT_USER_CACHE_TTL),
        )?;
        Ok(user)
    }
}

#[async_trait]
impl JobHandler for GitlabJobHandler {
    async fn execute(&self, job: &JobKind) -> Result<()> {
        match job {
            JobKind::SendComment {
                base_url,
                user_id,
                chat_id,
                target,
                body,
                comment_message_id,
            } => {
                let token = self.access_token(base_url, *user_id)?;
                let note = self
                    .api
                    .create_note(base_url, &token, target, body)
                    .await
                    .context("failed to post gitlab note")?;
                // The note exists remotely from here on; a retry would post it twice.
                match note.note_ref(target) {
                    Some(note_ref) => {
                        let key = EventKey::note(target.project_id(), note_ref);
                        match self.correlations.attach(*chat_id, &key, *comment_message_id) {
                            Ok(()) => {
                                tracing::info!(chat_id, event_key = %key, "posted gitlab note")
                            }
                            Err(error) => tracing::warn!(
                                chat_id,
                                event_key = %key,
                                error = %format!("{error:#}"),
                                "posted gitlab note but failed to record it; its echo may be relayed"
                            ),
                        }
                    }
                    None => {
                        tracing::warn!(chat_id, "gitlab note created without id or timestamp")
                    }
                }
                Ok(())
            }
            JobKind::CacheNickMap {
                base_url,
                user_id,
                chat_handle,
            } => {
                let user = self.current_user(base_url, *user_id).await?;
                self.nicknames.remember(
                    &user.username,
                    user.email.as_deref().unwrap_or_default(),
                    chat_handle,
                )?;
                tracing::debug!(user_id, gitlab_user = %user.username, "cached nickname mapping");
                Ok(())
            }
        }
    }
}
