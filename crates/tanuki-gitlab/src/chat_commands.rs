//! Chat commands, settings keyboard presses and per-chat webhook tokens.

use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tanuki_core::{CacheScope, KeyedCache};

use crate::{
    chat_transport::{ChatId, ChatTransport, OutboundMessage, ReplyMarkup},
    chat_update::{CallbackPress, ChatUpdate, IncomingMessage},
    markup::{bold, fixed},
    notification_settings::SettingsStore,
    reply_engine::ReplyEngine,
    settings_keyboard::{categories_keyboard, press_settings_button, SettingsPress, SETTINGS_PROMPT},
};

const HOOK_TOKEN_LEN: usize = 32;
const CLEAN_TEXT: &str = "Clean";

/// Derives the URL token a chat's GitLab webhooks are delivered to.
pub fn hook_token(hook_secret: &str, chat_id: ChatId) -> String {
    let digest = format!("{:x}", Sha256::digest(format!("{hook_secret}:{chat_id}")));
    digest[..HOOK_TOKEN_LEN].to_string()
}

/// Maps webhook tokens back to the chats that registered them.
#[derive(Clone)]
pub struct HookRegistry {
    cache: Arc<dyn KeyedCache>,
    hook_secret: String,
    public_url: String,
}

impl HookRegistry {
    pub fn new(
        cache: Arc<dyn KeyedCache>,
        hook_secret: impl Into<String>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            hook_secret: hook_secret.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Registers `chat_id` and returns its webhook URL.
    pub fn register(&self, chat_id: ChatId) -> Result<String> {
        let token = hook_token(&self.hook_secret, chat_id);
        self.cache
            .set(
                CacheScope::Service,
                &format!("hook_{token}"),
                &chat_id.to_string(),
                None,
            )
            .with_context(|| format!("failed to register webhook token for chat {chat_id}"))?;
        Ok(format!("{}/webhooks/gitlab/{token}", self.public_url))
    }

    pub fn resolve(&self, token: &str) -> Result<Option<ChatId>> {
        if token.len() != HOOK_TOKEN_LEN || !token.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Ok(None);
        }
        let Some(raw) = self.cache.get(CacheScope::Service, &format!("hook_{token}"))? else {
            return Ok(None);
        };
        Ok(raw.parse::<ChatId>().ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatUpdateOutcome {
    Started,
    SettingsShown,
    Cleaned,
    SettingsPressed { changed: bool },
    ReplyResumed,
    Ignored,
}

impl ChatUpdateOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::SettingsShown => "settings_shown",
            Self::Cleaned => "cleaned",
            Self::SettingsPressed { .. } => "settings_pressed",
            Self::ReplyResumed => "reply_resumed",
            Self::Ignored => "ignored",
        }
    }
}

pub struct ChatCommandRouter {
    transport: Arc<dyn ChatTransport>,
    settings: Arc<dyn SettingsStore>,
    hooks: HookRegistry,
    replies: Arc<ReplyEngine>,
}

impl ChatCommandRouter {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        settings: Arc<dyn SettingsStore>,
        hooks: HookRegistry,
        replies: Arc<ReplyEngine>,
    ) -> Self {
        Self {
            transport,
            settings,
            hooks,
            replies,
        }
    }

    pub async fn handle_update(&self, update: &ChatUpdate) -> Result<ChatUpdateOutcome> {
        match update {
            ChatUpdate::Message(message) => self.handle_message(message).await,
            ChatUpdate::Callback(press) => self.handle_callback(press).await,
        }
    }

    pub async fn handle_message(&self, message: &IncomingMessage) -> Result<ChatUpdateOutcome> {
        let (mut command, param) = message.command().unwrap_or_default();
        if message.bot_added_to_group {
            command = "start";
        }
        if param == "silent" {
            return Ok(ChatUpdateOutcome::Ignored);
        }

        match command {
            "start" => {
                let hook_url = self.hooks.register(message.chat_id)?;
                let text = format!(
                    "Hi here! To setup notifications {} your GitLab project(repo), open Settings -> Web Hooks and add this URL:\n{}",
                    bold("for this chat"),
                    fixed(&hook_url)
                );
                self.transport
                    .send_text(OutboundMessage::html(message.chat_id, text))
                    .await?;
                Ok(ChatUpdateOutcome::Started)
            }
            "settings" => {
                self.transport
                    .send_text(
                        OutboundMessage::plain(message.chat_id, SETTINGS_PROMPT)
                            .with_markup(ReplyMarkup::Inline(categories_keyboard())),
                    )
                    .await?;
                Ok(ChatUpdateOutcome::SettingsShown)
            }
            "cancel" | "clean" | "reset" => {
                self.replies.state().clear_binding(message.chat_id)?;
                self.transport
                    .send_text(
                        OutboundMessage::plain(message.chat_id, CLEAN_TEXT)
                            .with_markup(ReplyMarkup::RemoveKeyboard),
                    )
                    .await?;
                Ok(ChatUpdateOutcome::Cleaned)
            }
            _ if self.replies.handle_message(message).await? => Ok(ChatUpdateOutcome::ReplyResumed),
            _ => Ok(ChatUpdateOutcome::Ignored),
        }
    }

    pub async fn handle_callback(&self, press: &CallbackPress) -> Result<ChatUpdateOutcome> {
        let settings = self.settings.load(press.chat_id)?;
        let result = press_settings_button(
            &SettingsPress {
                keyboard_state: &press.keyboard_state,
                data: &press.data,
                button_state: press.button_state,
            },
            &settings,
        );
        if result.changed {
            self.settings.save(press.chat_id, &result.settings)?;
            tracing::info!(
                chat_id = press.chat_id,
                keyboard_state = %press.keyboard_state,
                toggle = %press.data,
                "notification settings updated"
            );
        }
        self.transport
            .edit_inline_keyboard(press.chat_id, press.message_id, &result.keyboard)
            .await?;
        if let Err(error) = self.transport.answer_callback(&press.callback_id, "").await {
            tracing::debug!(%error, callback_id = %press.callback_id, "failed to answer callback");
        }
        Ok(ChatUpdateOutcome::SettingsPressed {
            changed: result.changed,
        })
    }
}
