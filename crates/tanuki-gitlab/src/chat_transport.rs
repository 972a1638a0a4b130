//! Chat transport contract consumed by the notification engine.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::markup::LinkPreview;

pub type ChatId = i64;
pub type UserId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
}

impl ChatUser {
    /// Mention handle (`@username`), or the first name for users without one.
    pub fn mention(&self) -> String {
        match self.username.as_deref().filter(|name| !name.is_empty()) {
            Some(username) => format!("@{username}"),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub data: String,
    pub label: String,
    /// Toggle state rendered into the button; `None` for plain navigation.
    #[serde(default)]
    pub state: Option<u8>,
}

impl InlineButton {
    pub fn new(data: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            label: label.into(),
            state: None,
        }
    }

    pub fn with_state(mut self, state: u8) -> Self {
        self.state = Some(state);
        self
    }
}

/// Inline keyboard attached to a message. `state` names the screen it renders.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InlineKeyboard {
    pub state: String,
    pub buttons: Vec<InlineButton>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardButton {
    pub data: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReplyMarkup {
    #[default]
    None,
    Keyboard {
        buttons: Vec<KeyboardButton>,
        columns: usize,
        one_time: bool,
    },
    Inline(InlineKeyboard),
    ForceReply,
    RemoveKeyboard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub html: bool,
    pub disable_web_preview: bool,
    pub reply_to_message_id: Option<MessageId>,
    pub markup: ReplyMarkup,
}

impl OutboundMessage {
    pub fn html(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            html: true,
            disable_web_preview: true,
            reply_to_message_id: None,
            markup: ReplyMarkup::None,
        }
    }

    pub fn plain(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            html: false,
            ..Self::html(chat_id, text)
        }
    }

    pub fn reply_to(mut self, message_id: MessageId) -> Self {
        self.reply_to_message_id = Some(message_id);
        self
    }

    pub fn with_markup(mut self, markup: ReplyMarkup) -> Self {
        self.markup = markup;
        self
    }

    pub fn enable_web_preview(mut self) -> Self {
        self.disable_web_preview = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, message: OutboundMessage) -> Result<SentMessage>;

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        html: bool,
    ) -> Result<()>;

    async fn edit_inline_keyboard(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        keyboard: &InlineKeyboard,
    ) -> Result<()>;

    async fn answer_callback(&self, _callback_id: &str, _text: &str) -> Result<()> {
        Ok(())
    }

    /// Returns an href that renders `preview` as a summary card.
    ///
    /// Transports without hosted preview pages fall back to the resource URL.
    fn preview_link(&self, preview: &LinkPreview) -> String {
        preview.url.clone()
    }
}
