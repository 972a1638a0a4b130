//! In-memory collaborators shared by this crate's tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering},
        Mutex,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::{
    chat_transport::{
        ChatId, ChatTransport, InlineKeyboard, MessageId, OutboundMessage, SentMessage, UserId,
    },
    gitlab_api_client::{CommentApi, CreatedNote, GitlabUser, NoteTarget},
    gitlab_oauth::{
        normalize_base_url, CompletedAuthorization, OAuthProvider, TokenExchangeOutcome,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedEdit {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: String,
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    next_message_id: AtomicI64,
    pub sent: Mutex<Vec<(MessageId, OutboundMessage)>>,
    pub edits: Mutex<Vec<RecordedEdit>>,
    pub keyboard_edits: Mutex<Vec<(ChatId, MessageId, InlineKeyboard)>>,
    pub answered_callbacks: Mutex<Vec<String>>,
    pub unreachable_chats: Mutex<HashSet<ChatId>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1_000),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(MessageId, OutboundMessage)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|(_, message)| message.text)
            .collect()
    }

    pub fn edits(&self) -> Vec<RecordedEdit> {
        self.edits.lock().expect("edits lock").clone()
    }

    pub fn last_sent(&self) -> Option<(MessageId, OutboundMessage)> {
        self.sent().last().cloned()
    }

    pub fn make_unreachable(&self, chat_id: ChatId) {
        self.unreachable_chats
            .lock()
            .expect("unreachable lock")
            .insert(chat_id);
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, message: OutboundMessage) -> Result<SentMessage> {
        if self
            .unreachable_chats
            .lock()
            .expect("unreachable lock")
            .contains(&message.chat_id)
        {
            bail!("chat {} is unreachable", message.chat_id);
        }
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let chat_id = message.chat_id;
        self.sent
            .lock()
            .expect("sent lock")
            .push((message_id, message));
        Ok(SentMessage {
            chat_id,
            message_id,
        })
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        _html: bool,
    ) -> Result<()> {
        self.edits.lock().expect("edits lock").push(RecordedEdit {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn edit_inline_keyboard(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        keyboard: &InlineKeyboard,
    ) -> Result<()> {
        self.keyboard_edits.lock().expect("keyboard lock").push((
            chat_id,
            message_id,
            keyboard.clone(),
        ));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, _text: &str) -> Result<()> {
        self.answered_callbacks
            .lock()
            .expect("callback lock")
            .push(callback_id.to_string());
        Ok(())
    }
}

pub(crate) struct ScriptedOAuth {
    pub configured: Mutex<HashSet<String>>,
    pub tokens: Mutex<HashMap<(String, UserId), String>>,
    pub probe_outcome: Mutex<TokenExchangeOutcome>,
    pub saved_apps: Mutex<Vec<(String, String, String)>>,
    pub pending: Mutex<HashMap<String, (UserId, String)>>,
}

impl ScriptedOAuth {
    pub fn new() -> Self {
        Self {
            configured: Mutex::new(HashSet::new()),
            tokens: Mutex::new(HashMap::new()),
            probe_outcome: Mutex::new(TokenExchangeOutcome::InvalidGrant),
            saved_apps: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn configure(&self, base_url: &str) {
        self.configured
            .lock()
            .expect("configured lock")
            .insert(normalize_base_url(base_url));
    }

    pub fn authorize(&self, base_url: &str, user_id: UserId, token: &str) {
        self.configure(base_url);
        self.tokens
            .lock()
            .expect("tokens lock")
            .insert((normalize_base_url(base_url), user_id), token.to_string());
    }

    pub fn set_probe_outcome(&self, outcome: TokenExchangeOutcome) {
        *self.probe_outcome.lock().expect("probe lock") = outcome;
    }
}

#[async_trait]
impl OAuthProvider for ScriptedOAuth {
    fn is_configured(&self, base_url: &str) -> Result<bool> {
        Ok(self
            .configured
            .lock()
            .expect("configured lock")
            .contains(&normalize_base_url(base_url)))
    }

    fn access_token(&self, base_url: &str, user_id: UserId) -> Result<Option<String>> {
        Ok(self
            .tokens
            .lock()
            .expect("tokens lock")
            .get(&(normalize_base_url(base_url), user_id))
            .cloned())
    }

    fn authorization_url(&self, base_url: &str, user_id: UserId) -> Result<String> {
        let state = format!("state-{user_id}");
        self.pending
            .lock()
            .expect("pending lock")
            .insert(state.clone(), (user_id, normalize_base_url(base_url)));
        Ok(format!(
            "{}/oauth/authorize?state={state}",
            normalize_base_url(base_url)
        ))
    }

    fn redirect_uri(&self) -> String {
        "https://relay.example.com/oauth/gitlab/callback".to_string()
    }

    async fn exchange_app_credentials(
        &self,
        _base_url: &str,
        _client_id: &str,
        _client_secret: &str,
    ) -> Result<TokenExchangeOutcome> {
        Ok(self.probe_outcome.lock().expect("probe lock").clone())
    }

    fn save_app_credentials(
        &self,
        base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<()> {
        self.configure(base_url);
        self.saved_apps.lock().expect("apps lock").push((
            normalize_base_url(base_url),
            client_id.to_string(),
            client_secret.to_string(),
        ));
        Ok(())
    }

    async fn complete_authorization(
        &self,
        state: &str,
        code: &str,
    ) -> Result<Option<CompletedAuthorization>> {
        let pending = self.pending.lock().expect("pending lock").remove(state);
        let Some((user_id, base_url)) = pending else {
            return Ok(None);
        };
        self.authorize(&base_url, user_id, code);
        Ok(Some(CompletedAuthorization {
            user_id,
            base_url,
            outcome: TokenExchangeOutcome::Success(code.to_string()),
        }))
    }
}

pub(crate) struct RecordingCommentApi {
    pub notes: Mutex<Vec<(String, NoteTarget, String)>>,
    pub failures_remaining: AtomicU32,
    next_note_id: AtomicU64,
    pub user: GitlabUser,
}

impl RecordingCommentApi {
    pub fn new() -> Self {
        Self {
            notes: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(0),
            next_note_id: AtomicU64::new(500),
            user: GitlabUser {
                id: 9,
                username: "jane".to_string(),
                name: "Jane".to_string(),
                email: Some("jane@example.com".to_string()),
            },
        }
    }

    pub fn notes(&self) -> Vec<(String, NoteTarget, String)> {
        self.notes.lock().expect("notes lock").clone()
    }
}

#[async_trait]
impl CommentApi for RecordingCommentApi {
    async fn create_note(
        &self,
        _base_url: &str,
        access_token: &str,
        target: &NoteTarget,
        body: &str,
    ) -> Result<CreatedNote> {
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            bail!("gitlab api create note failed with status 502");
        }
        self.notes.lock().expect("notes lock").push((
            access_token.to_string(),
            target.clone(),
            body.to_string(),
        ));
        Ok(CreatedNote {
            id: Some(self.next_note_id.fetch_add(1, Ordering::SeqCst)),
            created_at: Some("2024-03-01T09:00:00Z".to_string()),
        })
    }

    async fn current_user(&self, _base_url: &str, _access_token: &str) -> Result<GitlabUser> {
        Ok(self.user.clone())
    }
}
