//! Telegram Bot API implementation of the chat transport.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tanuki_gitlab::{
    chat_transport::{
        ChatId, ChatTransport, InlineKeyboard, MessageId, OutboundMessage, ReplyMarkup,
        SentMessage,
    },
    chat_update::encode_callback_data,
    http_retry::{clip_error_body, is_transient_status, is_transient_transport_error, RetryPolicy},
};
use thiserror::Error;

const NOT_MODIFIED_MARKER: &str = "message is not modified";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramTransportConfig {
    pub api_base: String,
    pub bot_token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for TelegramTransportConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token: String::new(),
            request_timeout_ms: 10_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum TelegramApiError {
    #[error("telegram {method} request failed: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("telegram {method} failed with status {status}: {description}")]
    Status {
        method: String,
        status: u16,
        description: String,
    },
    #[error("telegram {method} returned an unreadable response: {detail}")]
    Decode { method: String, detail: String },
}

impl TelegramApiError {
    fn is_not_modified(&self) -> bool {
        matches!(self, Self::Status { description, .. } if description.contains(NOT_MODIFIED_MARKER))
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessageResult {
    message_id: MessageId,
    chat: SentMessageChat,
}

#[derive(Debug, Deserialize)]
struct SentMessageChat {
    id: ChatId,
}

pub struct TelegramChatTransport {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    retry: RetryPolicy,
}

impl TelegramChatTransport {
    pub fn new(config: TelegramTransportConfig) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            anyhow::bail!("telegram transport requires a bot token");
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create telegram http client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            bot_token: config.bot_token.trim().to_string(),
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay_ms),
        })
    }

    async fn call(&self, method: &str, body: &Value) -> Result<Value, TelegramApiError> {
        let endpoint = format!("{}/bot{}/{method}", self.api_base, self.bot_token);
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = match self.http.post(endpoint.as_str()).json(body).send().await {
                Ok(response) => response,
                Err(error) => {
                    if self.retry.allows_retry_after(attempt) && is_transient_transport_error(&error)
                    {
                        tokio::time::sleep(self.retry.backoff(attempt, None)).await;
                        continue;
                    }
                    return Err(TelegramApiError::Transport {
                        method: method.to_string(),
                        source: error,
                    });
                }
            };

            let status = response.status();
            let raw = response.text().await.unwrap_or_default();
            let envelope = serde_json::from_str::<ApiEnvelope>(&raw).ok();
            if let Some(envelope) = envelope.as_ref().filter(|envelope| envelope.ok) {
                return Ok(envelope.result.clone());
            }

            let retry_after = envelope
                .as_ref()
                .and_then(|envelope| envelope.parameters.as_ref())
                .and_then(|parameters| parameters.retry_after)
                .map(Duration::from_secs);
            if self.retry.allows_retry_after(attempt) && is_transient_status(status) {
                tracing::debug!(
                    method,
                    attempt,
                    status = status.as_u16(),
                    "retrying telegram request"
                );
                tokio::time::sleep(self.retry.backoff(attempt, retry_after)).await;
                continue;
            }
            let description = envelope
                .map(|envelope| envelope.description)
                .filter(|description| !description.is_empty())
                .unwrap_or(raw);
            return Err(TelegramApiError::Status {
                method: method.to_string(),
                status: status.as_u16(),
                description: clip_error_body(&description, 400),
            });
        }
    }
}

/// Renders chat markup as a Telegram `reply_markup` object.
pub fn reply_markup_json(markup: &ReplyMarkup) -> Option<Value> {
    match markup {
        ReplyMarkup::None => None,
        ReplyMarkup::Keyboard {
            buttons,
            columns,
            one_time,
        } => {
            let rows = buttons
                .chunks((*columns).max(1))
                .map(|row| {
                    row.iter()
                        .map(|button| json!({ "text": button.label }))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();
            Some(json!({
                "keyboard": rows,
                "one_time_keyboard": one_time,
                "resize_keyboard": true,
                "selective": true,
            }))
        }
        ReplyMarkup::Inline(keyboard) => Some(inline_keyboard_json(keyboard)),
        ReplyMarkup::ForceReply => Some(json!({ "force_reply": true, "selective": true })),
        ReplyMarkup::RemoveKeyboard => Some(json!({ "remove_keyboard": true, "selective": true })),
    }
}

fn inline_keyboard_json(keyboard: &InlineKeyboard) -> Value {
    let rows = keyboard
        .buttons
        .iter()
        .map(|button| {
            vec![json!({
                "text": button.label,
                "callback_data": encode_callback_data(&keyboard.state, &button.data, button.state),
            })]
        })
        .collect::<Vec<_>>();
    json!({ "inline_keyboard": rows })
}

#[async_trait]
impl ChatTransport for TelegramChatTransport {
    async fn send_text(&self, message: OutboundMessage) -> Result<SentMessage> {
        let mut body = Map::new();
        body.insert("chat_id".to_string(), json!(message.chat_id));
        body.insert("text".to_string(), json!(message.text));
        body.insert(
            "disable_web_page_preview".to_string(),
            json!(message.disable_web_preview),
        );
        if message.html {
            body.insert("parse_mode".to_string(), json!("HTML"));
        }
        if let Some(reply_to) = message.reply_to_message_id {
            body.insert("reply_to_message_id".to_string(), json!(reply_to));
            body.insert("allow_sending_without_reply".to_string(), json!(true));
        }
        if let Some(markup) = reply_markup_json(&message.markup) {
            body.insert("reply_markup".to_string(), markup);
        }

        let result = self.call("sendMessage", &Value::Object(body)).await?;
        let sent = serde_json::from_value::<SentMessageResult>(result).map_err(|error| {
            TelegramApiError::Decode {
                method: "sendMessage".to_string(),
                detail: error.to_string(),
            }
        })?;
        Ok(SentMessage {
            chat_id: sent.chat.id,
            message_id: sent.message_id,
        })
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        html: bool,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        if html {
            body["parse_mode"] = json!("HTML");
        }
        match self.call("editMessageText", &body).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_not_modified() => {
                tracing::debug!(chat_id, message_id, "message text unchanged");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn edit_inline_keyboard(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        keyboard: &InlineKeyboard,
    ) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": inline_keyboard_json(keyboard),
        });
        match self.call("editMessageReplyMarkup", &body).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_not_modified() => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if !text.is_empty() {
            body["text"] = json!(text);
        }
        self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }
}
