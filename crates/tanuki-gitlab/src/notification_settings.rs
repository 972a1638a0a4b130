//! Per-chat notification toggles.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tanuki_core::{get_json, set_json, CacheScope, KeyedCache};

use crate::chat_transport::ChatId;

const SETTINGS_CACHE_NAME: &str = "settings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Ci,
    MergeRequests,
    Issues,
}

impl NotificationCategory {
    pub const ALL: [Self; 3] = [Self::Ci, Self::MergeRequests, Self::Issues];

    /// Toggles offered for this category, in display order.
    pub fn actions(self) -> &'static [NotificationAction] {
        use NotificationAction::*;
        match self {
            Self::Ci => &[Success, Fail, Cancel],
            Self::MergeRequests => &[Open, Update, Merge, Close],
            Self::Issues => &[Open, Update, Close, Reopen],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ci => "ci",
            Self::MergeRequests => "mr",
            Self::Issues => "issues",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.as_str() == raw)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ci => "CI",
            Self::MergeRequests => "Merge requests",
            Self::Issues => "Issues",
        }
    }

    fn default_enabled(self, action: NotificationAction) -> bool {
        !matches!(
            (self, action),
            (Self::Ci, NotificationAction::Success)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Open,
    Close,
    Update,
    Reopen,
    Merge,
    Success,
    Fail,
    Cancel,
}

impl NotificationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Update => "update",
            Self::Reopen => "reopen",
            Self::Merge => "merge",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        use NotificationAction::*;
        [Open, Close, Update, Reopen, Merge, Success, Fail, Cancel]
            .into_iter()
            .find(|action| action.as_str() == raw)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Close => "Close",
            Self::Update => "Update",
            Self::Reopen => "Reopen",
            Self::Merge => "Merge",
            Self::Success => "Success",
            Self::Fail => "Fail",
            Self::Cancel => "Cancel",
        }
    }
}

/// Enum-indexed toggle table. Absent entries read as the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatNotificationSettings {
    #[serde(default)]
    toggles: BTreeMap<NotificationCategory, BTreeMap<NotificationAction, bool>>,
}

impl ChatNotificationSettings {
    pub fn is_enabled(&self, category: NotificationCategory, action: NotificationAction) -> bool {
        if !category.actions().contains(&action) {
            return false;
        }
        self.toggles
            .get(&category)
            .and_then(|actions| actions.get(&action))
            .copied()
            .unwrap_or_else(|| category.default_enabled(action))
    }

    /// Sets a toggle; returns false for pairs the category does not offer.
    pub fn set(
        &mut self,
        category: NotificationCategory,
        action: NotificationAction,
        enabled: bool,
    ) -> bool {
        if !category.actions().contains(&action) {
            return false;
        }
        self.toggles
            .entry(category)
            .or_default()
            .insert(action, enabled);
        true
    }
}

pub trait SettingsStore: Send + Sync {
    fn load(&self, chat_id: ChatId) -> Result<ChatNotificationSettings>;

    fn save(&self, chat_id: ChatId, settings: &ChatNotificationSettings) -> Result<()>;
}

pub struct CacheSettingsStore {
    cache: Arc<dyn KeyedCache>,
}

impl CacheSettingsStore {
    pub fn new(cache: Arc<dyn KeyedCache>) -> Self {
        Self { cache }
    }
}

impl SettingsStore for CacheSettingsStore {
    fn load(&self, chat_id: ChatId) -> Result<ChatNotificationSettings> {
        Ok(get_json(
            self.cache.as_ref(),
            CacheScope::Chat(chat_id),
            SETTINGS_CACHE_NAME,
        )?
        .unwrap_or_default())
    }

    fn save(&self, chat_id: ChatId, settings: &ChatNotificationSettings) -> Result<()> {
        set_json(
            self.cache.as_ref(),
            CacheScope::Chat(chat_id),
            SETTINGS_CACHE_NAME,
            settings,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use tanuki_core::InMemoryKeyedCache;

    use super::*;
    use NotificationAction::*;
    use NotificationCategory::*;

    #[test]
    fn unit_defaults_mute_only_ci_success() {
        let settings = ChatNotificationSettings::default();
        for category in NotificationCategory::ALL {
            for action in category.actions() {
                let expected = !(category == Ci && *action == Success);
                assert_eq!(settings.is_enabled(category, *action), expected);
            }
        }
    }

    #[test]
    fn unit_invalid_pairs_are_never_enabled() {
        let mut settings = ChatNotificationSettings::default();
        assert!(!settings.is_enabled(Ci, Open));
        assert!(!settings.set(Issues, Merge, true));
        assert!(!settings.is_enabled(Issues, Merge));
    }

    #[test]
    fn functional_cache_settings_store_round_trips_toggles() {
        let store = CacheSettingsStore::new(Arc::new(InMemoryKeyedCache::new()));
        let mut settings = store.load(4).expect("load");
        assert!(settings.set(MergeRequests, Merge, false));
        store.save(4, &settings).expect("save");
        let loaded = store.load(4).expect("load");
        assert!(!loaded.is_enabled(MergeRequests, Merge));
        assert!(loaded.is_enabled(MergeRequests, Close));
        assert_eq!(store.load(5).expect("load"), ChatNotificationSettings::default());
    }

    #[test]
    fn unit_category_and_action_tokens_parse() {
        assert_eq!(NotificationCategory::parse("mr"), Some(MergeRequests));
        assert_eq!(NotificationCategory::parse("back"), None);
        assert_eq!(NotificationAction::parse("reopen"), Some(Reopen));
    }
}
