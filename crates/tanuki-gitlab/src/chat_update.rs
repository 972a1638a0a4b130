//! Inbound chat events as seen by the engine.

use serde::{Deserialize, Serialize};

use crate::chat_transport::{ChatId, ChatUser, MessageId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub from: ChatUser,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub reply_to_message_id: Option<MessageId>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub bot_added_to_group: bool,
}

impl IncomingMessage {
    /// Splits `/command@bot param` into (`command`, `param`).
    pub fn command(&self) -> Option<(&str, &str)> {
        let text = self.text.trim();
        let rest = text.strip_prefix('/')?;
        let (head, param) = match rest.split_once(char::is_whitespace) {
            Some((head, param)) => (head, param.trim()),
            None => (rest, ""),
        };
        let command = head.split('@').next().unwrap_or_default();
        if command.is_empty() {
            return None;
        }
        Some((command, param))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPress {
    pub callback_id: String,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub from: ChatUser,
    /// Screen the pressed inline keyboard was rendering.
    pub keyboard_state: String,
    pub data: String,
    #[serde(default)]
    pub button_state: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    Message(IncomingMessage),
    Callback(CallbackPress),
}

/// Packs an inline button into callback data as `state|data|button_state`.
pub fn encode_callback_data(keyboard_state: &str, data: &str, button_state: Option<u8>) -> String {
    match button_state {
        Some(state) => format!("{keyboard_state}|{data}|{state}"),
        None => format!("{keyboard_state}|{data}|"),
    }
}

/// Inverse of [`encode_callback_data`].
pub fn decode_callback_data(raw: &str) -> Option<(String, String, Option<u8>)> {
    let mut parts = raw.splitn(3, '|');
    let keyboard_state = parts.next()?.to_string();
    let data = parts.next()?.to_string();
    let button_state = parts.next().and_then(|state| state.parse::<u8>().ok());
    Some((keyboard_state, data, button_state))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id: 1,
            message_id: 2,
            from: ChatUser {
                id: 3,
                username: None,
                first_name: "A".to_string(),
            },
            text: text.to_string(),
            reply_to_message_id: None,
            is_private: true,
            bot_added_to_group: false,
        }
    }

    #[test]
    fn unit_command_parsing_strips_bot_suffix_and_param() {
        assert_eq!(message("/start").command(), Some(("start", "")));
        assert_eq!(
            message("/start@tanuki_bot silent").command(),
            Some(("start", "silent"))
        );
        assert_eq!(message("hello /start").command(), None);
        assert_eq!(message("/").command(), None);
    }

    #[test]
    fn unit_callback_data_encoding_is_reversible() {
        let encoded = encode_callback_data("ci", "fail", Some(1));
        assert_eq!(encoded, "ci|fail|1");
        assert_eq!(
            decode_callback_data(&encoded),
            Some(("ci".to_string(), "fail".to_string(), Some(1)))
        );
        assert_eq!(
            decode_callback_data("categories|mr|"),
            Some(("categories".to_string(), "mr".to_string(), None))
        );
        assert_eq!(decode_callback_data("garbage"), None);
    }
}
