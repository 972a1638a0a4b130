//! Chat-scoped correlation between GitLab resources and sent notifications.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tanuki_core::{current_unix_timestamp_ms, get_json, set_json, CacheScope, KeyedCache};

use crate::{
    chat_transport::{ChatId, MessageId},
    event_key::EventKey,
};

pub const NOTIFICATION_RECORD_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// A notification previously sent for an event key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub message_id: MessageId,
    #[serde(default)]
    pub text: String,
    /// Latest CI status line per build id, appended below `text` on edit.
    #[serde(default)]
    pub build_lines: BTreeMap<u64, String>,
    #[serde(default)]
    pub created_unix_ms: u64,
}

impl NotificationRecord {
    pub fn new(message_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            message_id,
            text: text.into(),
            build_lines: BTreeMap::new(),
            created_unix_ms: current_unix_timestamp_ms(),
        }
    }

    pub fn rendered_text(&self) -> String {
        let mut rendered = self.text.clone();
        for line in self.build_lines.values() {
            rendered.push('\n');
            rendered.push_str(line);
        }
        rendered
    }
}

#[derive(Clone)]
pub struct CorrelationStore {
    cache: Arc<dyn KeyedCache>,
}

impl CorrelationStore {
    pub fn new(cache: Arc<dyn KeyedCache>) -> Self {
        Self { cache }
    }

    fn entry_name(key: &EventKey) -> String {
        format!("event:{key}")
    }

    pub fn find(&self, chat_id: ChatId, key: &EventKey) -> Result<Option<NotificationRecord>> {
        get_json(
            self.cache.as_ref(),
            CacheScope::Chat(chat_id),
            &Self::entry_name(key),
        )
    }

    pub fn contains(&self, chat_id: ChatId, key: &EventKey) -> Result<bool> {
        Ok(self
            .cache
            .get(CacheScope::Chat(chat_id), &Self::entry_name(key))?
            .is_some())
    }

    pub fn record(
        &self,
        chat_id: ChatId,
        key: &EventKey,
        record: &NotificationRecord,
    ) -> Result<()> {
        tracing::debug!(chat_id, event_key = %key, message_id = record.message_id, "recording notification");
        set_json(
            self.cache.as_ref(),
            CacheScope::Chat(chat_id),
            &Self::entry_name(key),
            record,
            Some(NOTIFICATION_RECORD_TTL),
        )
    }

    /// Binds `key` to an existing chat message without rendered text.
    pub fn attach(&self, chat_id: ChatId, key: &EventKey, message_id: MessageId) -> Result<()> {
        self.record(chat_id, key, &NotificationRecord::new(message_id, String::new()))
    }

    /// Stores the latest status line for `build_id` under `key` and returns
    /// the record with its full rendered text, or `None` when no record exists.
    pub fn append_build_line(
        &self,
        chat_id: ChatId,
        key: &EventKey,
        build_id: u64,
        line: &str,
    ) -> Result<Option<NotificationRecord>> {
        let Some(mut record) = self.find(chat_id, key)? else {
            return Ok(None);
        };
        record.build_lines.insert(build_id, line.to_string());
        self.record(chat_id, key, &record)?;
        Ok(Some(record))
    }
}
