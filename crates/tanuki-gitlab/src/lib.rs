//! GitLab webhook notifications for chat, with interactive reply-back.
//! This crate classifies and renders webhook deliveries, correlates follow-up
//! events with earlier notifications, and turns chat replies into GitLab
//! comments through an OAuth-gated retrying job queue.

pub mod chat_commands;
pub mod chat_transport;
pub mod chat_update;
pub mod comment_jobs;
pub mod correlation_store;
pub mod event_key;
pub mod gitlab_api_client;
pub mod gitlab_oauth;
pub mod http_retry;
pub mod job_queue;
pub mod markup;
pub mod nickname_cache;
pub mod notification_settings;
pub mod notifier;
pub mod reply_engine;
pub mod reply_intent;
pub mod settings_keyboard;
pub mod webhook_payload;
pub mod webhook_renderer;

#[cfg(test)]
mod test_fakes;

pub use chat_commands::{hook_token, ChatUpdateOutcome, HookRegistry};
pub use chat_transport::{
    ChatId, ChatTransport, ChatUser, InlineButton, InlineKeyboard, KeyboardButton, MessageId,
    OutboundMessage, ReplyMarkup, SentMessage, UserId,
};
pub use chat_update::{
    decode_callback_data, encode_callback_data, CallbackPress, ChatUpdate, IncomingMessage,
};
pub use gitlab_api_client::{
    CommentApi, CreatedNote, GitlabApiClient, GitlabApiClientConfig, GitlabApiError, GitlabUser,
    NoteTarget,
};
pub use gitlab_oauth::{
    normalize_base_url, CompletedAuthorization, GitlabOAuthConfig, GitlabOAuthProvider,
    OAuthAppCredentials, OAuthProvider, TokenExchangeOutcome,
};
pub use job_queue::{JobQueueConfig, JobQueueHealthSnapshot};
pub use markup::LinkPreview;
pub use notifier::{GitlabNotifier, NotifierConfig, WebhookDelivery, WebhookDeliveryError};
pub use reply_engine::{NICK_MAP_DELAY, OAUTH_SUCCESS_TEXT};
pub use webhook_payload::{parse_gitlab_webhook, GitlabWebhook, WebhookParseError};
pub use webhook_renderer::{RendererConfig, SuppressReason, WebhookOutcome};
