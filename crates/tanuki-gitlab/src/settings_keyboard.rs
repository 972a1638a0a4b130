//! Inline keyboard navigation for notification settings.

use crate::{
    chat_transport::{InlineButton, InlineKeyboard},
    notification_settings::{ChatNotificationSettings, NotificationAction, NotificationCategory},
};

pub const CATEGORIES_STATE: &str = "categories";
pub const BACK_DATA: &str = "back";
pub const SETTINGS_PROMPT: &str = "Tune the notifications";
const ENABLED_MARK: &str = "☑️ ";
const BACK_LABEL: &str = "← Back";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsPress<'a> {
    /// Screen the pressed keyboard was rendering.
    pub keyboard_state: &'a str,
    pub data: &'a str,
    pub button_state: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsPressResult {
    pub keyboard: InlineKeyboard,
    pub settings: ChatNotificationSettings,
    pub changed: bool,
}

pub fn categories_keyboard() -> InlineKeyboard {
    InlineKeyboard {
        state: CATEGORIES_STATE.to_string(),
        buttons: NotificationCategory::ALL
            .into_iter()
            .map(|category| InlineButton::new(category.as_str(), category.label()))
            .collect(),
    }
}

pub fn category_keyboard(
    category: NotificationCategory,
    settings: &ChatNotificationSettings,
) -> InlineKeyboard {
    let mut buttons = vec![InlineButton::new(BACK_DATA, BACK_LABEL)];
    for action in category.actions() {
        let enabled = settings.is_enabled(category, *action);
        let mark = if enabled { ENABLED_MARK } else { "" };
        buttons.push(
            InlineButton::new(action.as_str(), format!("{mark}{}", action.label()))
                .with_state(u8::from(enabled)),
        );
    }
    InlineKeyboard {
        state: category.as_str().to_string(),
        buttons,
    }
}

/// Applies one button press. Pure: the caller persists `settings` when
/// `changed` is set.
pub fn press_settings_button(
    press: &SettingsPress<'_>,
    settings: &ChatNotificationSettings,
) -> SettingsPressResult {
    let unchanged = |keyboard| SettingsPressResult {
        keyboard,
        settings: settings.clone(),
        changed: false,
    };
    if press.data == BACK_DATA {
        return unchanged(categories_keyboard());
    }

    let screen = if press.keyboard_state == CATEGORIES_STATE {
        press.data
    } else {
        press.keyboard_state
    };
    let Some(category) = NotificationCategory::parse(screen) else {
        return unchanged(categories_keyboard());
    };

    let mut next = settings.clone();
    let mut changed = false;
    if press.keyboard_state != CATEGORIES_STATE {
        if let Some(action) = NotificationAction::parse(press.data) {
            let current = match press.button_state {
                Some(state) => state == 1,
                None => settings.is_enabled(category, action),
            };
            changed = next.set(category, action, !current) && next != *settings;
        }
    }
    SettingsPressResult {
        keyboard: category_keyboard(category, &next),
        settings: next,
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press<'a>(state: &'a str, data: &'a str, button_state: Option<u8>) -> SettingsPress<'a> {
        SettingsPress {
            keyboard_state: state,
            data,
            button_state,
        }
    }

    #[test]
    fn unit_selecting_category_renders_toggles_without_change() {
        let settings = ChatNotificationSettings::default();
        let result = press_settings_button(&press(CATEGORIES_STATE, "ci", None), &settings);
        assert!(!result.changed);
        assert_eq!(result.keyboard.state, "ci");
        let labels = result
            .keyboard
            .buttons
            .iter()
            .map(|button| button.label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["← Back", "Success", "☑️ Fail", "☑️ Cancel"]);
        assert_eq!(result.keyboard.buttons[1].state, Some(0));
    }

    #[test]
    fn functional_toggle_twice_restores_defaults() {
        let initial = ChatNotificationSettings::default();
        let first = press_settings_button(&press("issues", "close", Some(1)), &initial);
        assert!(first.changed);
        assert!(!first
            .settings
            .is_enabled(NotificationCategory::Issues, NotificationAction::Close));
        assert_eq!(first.keyboard.state, "issues");
        let second = press_settings_button(&press("issues", "close", Some(0)), &first.settings);
        assert!(second.changed);
        for action in NotificationCategory::Issues.actions() {
            assert_eq!(
                second
                    .settings
                    .is_enabled(NotificationCategory::Issues, *action),
                initial.is_enabled(NotificationCategory::Issues, *action)
            );
        }
    }

    #[test]
    fn unit_toggle_without_button_state_negates_stored_value() {
        let settings = ChatNotificationSettings::default();
        let result = press_settings_button(&press("ci", "success", None), &settings);
        assert!(result
            .settings
            .is_enabled(NotificationCategory::Ci, NotificationAction::Success));
    }

    #[test]
    fn unit_back_returns_to_categories_from_any_screen() {
        let settings = ChatNotificationSettings::default();
        let result = press_settings_button(&press("mr", BACK_DATA, None), &settings);
        assert_eq!(result.keyboard, categories_keyboard());
        assert!(!result.changed);
    }
}
