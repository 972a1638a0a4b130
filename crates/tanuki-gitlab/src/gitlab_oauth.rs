//! GitLab OAuth2 application and user token management.
//!
//! Application credentials are registered per GitLab instance (base URL) and
//! user tokens are stored per chat user and instance, both in the keyed cache.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tanuki_core::{current_unix_timestamp_ms, get_json, set_json, CacheScope, KeyedCache};
use url::Url;
use uuid::Uuid;

use crate::{chat_transport::UserId, http_retry::clip_error_body};

const PENDING_AUTH_STATE_PREFIX: &str = "oauth_state_";
const PENDING_AUTH_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const AUTH_STATE_LEN: usize = 32;

/// Result of exchanging an authorization code for a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenExchangeOutcome {
    Success(String),
    /// The instance recognised the application but refused the grant.
    InvalidGrant,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthAppCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Redirect that matched a pending authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedAuthorization {
    pub user_id: UserId,
    pub base_url: String,
    pub outcome: TokenExchangeOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PendingAuthorization {
    user_id: UserId,
    base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredUserToken {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_unix_ms: Option<u64>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Whether an OAuth application is known for this instance.
    fn is_configured(&self, base_url: &str) -> Result<bool>;

    fn access_token(&self, base_url: &str, user_id: UserId) -> Result<Option<String>>;

    fn is_user_authorized(&self, base_url: &str, user_id: UserId) -> Result<bool> {
        Ok(self.access_token(base_url, user_id)?.is_some())
    }

    /// Authorization URL whose `state` is a fresh one-time nonce bound to
    /// `user_id` and `base_url`.
    fn authorization_url(&self, base_url: &str, user_id: UserId) -> Result<String>;

    fn redirect_uri(&self) -> String;

    /// Trial token exchange with a dummy code to validate app credentials.
    async fn exchange_app_credentials(
        &self,
        base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenExchangeOutcome>;

    fn save_app_credentials(&self, base_url: &str, client_id: &str, client_secret: &str)
        -> Result<()>;

    /// Consumes `state` and exchanges `code` for the user it was issued to.
    /// Returns `None` when the state is unknown, expired, or already used.
    async fn complete_authorization(
        &self,
        state: &str,
        code: &str,
    ) -> Result<Option<CompletedAuthorization>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitlabOAuthConfig {
    pub redirect_uri: String,
    pub default_base_url: String,
    pub default_app: Option<OAuthAppCredentials>,
    pub request_timeout_ms: u64,
}

pub struct GitlabOAuthProvider {
    config: GitlabOAuthConfig,
    cache: Arc<dyn KeyedCache>,
    http: reqwest::Client,
}

impl GitlabOAuthProvider {
    pub fn new(config: GitlabOAuthConfig, cache: Arc<dyn KeyedCache>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create gitlab oauth client")?;
        Ok(Self {
            config,
            cache,
            http,
        })
    }

    fn app_entry_name(base_url: &str) -> String {
        format!("oauth_app_{}", normalize_base_url(base_url))
    }

    fn token_entry_name(base_url: &str) -> String {
        format!("oauth_token_{}", normalize_base_url(base_url))
    }

    fn state_entry_name(state: &str) -> String {
        format!("{PENDING_AUTH_STATE_PREFIX}{state}")
    }

    fn take_pending_authorization(&self, state: &str) -> Result<Option<PendingAuthorization>> {
        let state = state.trim();
        if state.len() != AUTH_STATE_LEN || !state.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Ok(None);
        }
        let name = Self::state_entry_name(state);
        let pending =
            get_json::<PendingAuthorization>(self.cache.as_ref(), CacheScope::Service, &name)?;
        if pending.is_some() {
            self.cache.remove(CacheScope::Service, &name)?;
        }
        Ok(pending)
    }

    fn app_credentials(&self, base_url: &str) -> Result<Option<OAuthAppCredentials>> {
        let stored = get_json::<OAuthAppCredentials>(
            self.cache.as_ref(),
            CacheScope::Service,
            &Self::app_entry_name(base_url),
        )?;
        if stored.is_some() {
            return Ok(stored);
        }
        if normalize_base_url(base_url) == normalize_base_url(&self.config.default_base_url) {
            return Ok(self.config.default_app.clone());
        }
        Ok(None)
    }

    async fn exchange_code(
        &self,
        base_url: &str,
        credentials: &OAuthAppCredentials,
        code: &str,
    ) -> Result<(TokenExchangeOutcome, Option<StoredUserToken>)> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            refresh_token: Option<String>,
            #[serde(default)]
            expires_in: Option<u64>,
        }

        let url = format!("{}/oauth/token", normalize_base_url(base_url));
        let response = self
            .http
            .post(url.as_str())
            .json(&json!({
                "client_id": credentials.client_id,
                "client_secret": credentials.client_secret,
                "code": code,
                "grant_type": "authorization_code",
                "redirect_uri": self.config.redirect_uri,
            }))
            .send()
            .await
            .with_context(|| format!("gitlab oauth token request to {url} failed"))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            let token = serde_json::from_str::<TokenResponse>(&body)
                .context("failed to decode gitlab oauth token response")?;
            let stored = StoredUserToken {
                access_token: token.access_token.clone(),
                refresh_token: token.refresh_token,
                expires_unix_ms: token.expires_in.map(|seconds| {
                    current_unix_timestamp_ms().saturating_add(seconds.saturating_mul(1_000))
                }),
            };
            return Ok((TokenExchangeOutcome::Success(token.access_token), Some(stored)));
        }
        if body.contains("invalid_grant") {
            return Ok((TokenExchangeOutcome::InvalidGrant, None));
        }
        Ok((
            TokenExchangeOutcome::Rejected(format!(
                "status {}: {}",
                status.as_u16(),
                clip_error_body(&body, 300)
            )),
            None,
        ))
    }
}

#[async_trait]
impl OAuthProvider for GitlabOAuthProvider {
    fn is_configured(&self, base_url: &str) -> Result<bool> {
        Ok(self.app_credentials(base_url)?.is_some())
    }

    fn access_token(&self, base_url: &str, user_id: UserId) -> Result<Option<String>> {
        let token = get_json::<StoredUserToken>(
            self.cache.as_ref(),
            CacheScope::User(user_id),
            &Self::token_entry_name(base_url),
        )?;
        let now = current_unix_timestamp_ms();
        Ok(token
            .filter(|token| !tanuki_core::is_expired_unix_ms(token.expires_unix_ms, now))
            .map(|token| token.access_token))
    }

    fn authorization_url(&self, base_url: &str, user_id: UserId) -> Result<String> {
        let credentials = self
            .app_credentials(base_url)?
            .with_context(|| format!("no oauth application configured for {base_url}"))?;
        let state = Uuid::new_v4().simple().to_string();
        set_json(
            self.cache.as_ref(),
            CacheScope::Service,
            &Self::state_entry_name(&state),
            &PendingAuthorization {
                user_id,
                base_url: normalize_base_url(base_url),
            },
            Some(PENDING_AUTH_TTL),
        )?;
        let url = Url::parse_with_params(
            &format!("{}/oauth/authorize", normalize_base_url(base_url)),
            &[
                ("client_id", credentials.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("state", state.as_str()),
            ],
        )
        .with_context(|| format!("invalid gitlab base url {base_url}"))?;
        Ok(url.to_string())
    }

    fn redirect_uri(&self) -> String {
        self.config.redirect_uri.clone()
    }

    async fn exchange_app_credentials(
        &self,
        base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenExchangeOutcome> {
        let credentials = OAuthAppCredentials {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        };
        let (outcome, _) = self.exchange_code(base_url, &credentials, "-").await?;
        Ok(outcome)
    }

    fn save_app_credentials(
        &self,
        base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<()> {
        set_json(
            self.cache.as_ref(),
            CacheScope::Service,
            &Self::app_entry_name(base_url),
            &OAuthAppCredentials {
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
            },
            None,
        )
    }

    async fn complete_authorization(
        &self,
        state: &str,
        code: &str,
    ) -> Result<Option<CompletedAuthorization>> {
        let Some(PendingAuthorization { user_id, base_url }) =
            self.take_pending_authorization(state)?
        else {
            return Ok(None);
        };
        let credentials = self
            .app_credentials(&base_url)?
            .with_context(|| format!("no oauth application configured for {base_url}"))?;
        let (outcome, token) = self.exchange_code(&base_url, &credentials, code).await?;
        if let Some(token) = token {
            set_json(
                self.cache.as_ref(),
                CacheScope::User(user_id),
                &Self::token_entry_name(&base_url),
                &token,
                None,
            )?;
        }
        Ok(Some(CompletedAuthorization {
            user_id,
            base_url,
            outcome,
        }))
    }
}

pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}
