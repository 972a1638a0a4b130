//! Telegram Bot API adapter for the tanuki notification engine.

pub mod telegram_transport;
pub mod telegram_update;

pub use telegram_transport::{
    reply_markup_json, TelegramApiError, TelegramChatTransport, TelegramTransportConfig,
};
pub use telegram_update::{bot_user_id_from_token, parse_telegram_update, TelegramUpdateError};
