//! Converts Telegram webhook updates into engine chat updates.

use serde::Deserialize;
use tanuki_gitlab::{
    chat_transport::{ChatId, ChatUser, MessageId, UserId},
    chat_update::{decode_callback_data, CallbackPress, ChatUpdate, IncomingMessage},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramUpdateError {
    #[error("telegram update is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: MessageId,
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    reply_to_message: Option<Box<ReplyTarget>>,
    #[serde(default)]
    reply_markup: Option<InlineMarkup>,
    #[serde(default)]
    new_chat_members: Vec<User>,
    #[serde(default)]
    group_chat_created: bool,
}

#[derive(Debug, Deserialize)]
struct ReplyTarget {
    message_id: MessageId,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: ChatId,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct User {
    id: UserId,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: String,
}

impl From<User> for ChatUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InlineMarkup {
    #[serde(default)]
    inline_keyboard: Vec<Vec<InlineMarkupButton>>,
}

#[derive(Debug, Deserialize)]
struct InlineMarkupButton {
    #[serde(default)]
    callback_data: Option<String>,
}

/// Extracts the numeric bot id embedded in a bot token (`<id>:<secret>`).
pub fn bot_user_id_from_token(token: &str) -> Option<UserId> {
    token.trim().split_once(':')?.0.parse().ok()
}

/// Parses one update. Returns `Ok(None)` for update kinds the engine ignores.
pub fn parse_telegram_update(
    raw: &str,
    bot_user_id: Option<UserId>,
) -> Result<Option<ChatUpdate>, TelegramUpdateError> {
    let update = serde_json::from_str::<Update>(raw)?;
    if let Some(query) = update.callback_query {
        return Ok(callback_update(query));
    }
    Ok(update
        .message
        .and_then(|message| message_update(message, bot_user_id)))
}

fn message_update(message: Message, bot_user_id: Option<UserId>) -> Option<ChatUpdate> {
    let from = message.from?;
    let bot_added_to_group = message.group_chat_created
        || bot_user_id.is_some_and(|bot_id| {
            message
                .new_chat_members
                .iter()
                .any(|member| member.id == bot_id)
        });
    Some(ChatUpdate::Message(IncomingMessage {
        chat_id: message.chat.id,
        message_id: message.message_id,
        from: from.into(),
        text: message.text.unwrap_or_default(),
        reply_to_message_id: message.reply_to_message.map(|target| target.message_id),
        is_private: message.chat.kind == "private",
        bot_added_to_group,
    }))
}

fn callback_update(query: CallbackQuery) -> Option<ChatUpdate> {
    let message = query.message?;
    let raw = query.data.unwrap_or_default();
    let Some((keyboard_state, data, button_state)) = decode_callback_data(&raw) else {
        tracing::debug!(callback_id = %query.id, "ignoring callback with foreign payload");
        return None;
    };
    let keyboard_state = if keyboard_state.is_empty() {
        keyboard_state_from_markup(message.reply_markup.as_ref()).unwrap_or_default()
    } else {
        keyboard_state
    };
    Some(ChatUpdate::Callback(CallbackPress {
        callback_id: query.id,
        chat_id: message.chat.id,
        message_id: message.message_id,
        from: query.from.into(),
        keyboard_state,
        data,
        button_state,
    }))
}

fn keyboard_state_from_markup(markup: Option<&InlineMarkup>) -> Option<String> {
    markup?
        .inline_keyboard
        .iter()
        .flatten()
        .filter_map(|button| button.callback_data.as_deref())
        .find_map(|data| decode_callback_data(data).map(|(state, _, _)| state))
        .filter(|state| !state.is_empty())
}
