//! HTTP surface: GitLab and Telegram webhooks, the OAuth callback and health.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tanuki_gitlab::{
    GitlabApiClient, GitlabNotifier, GitlabOAuthProvider, TokenExchangeOutcome, UserId,
    WebhookDeliveryError,
};
use tanuki_telegram::{bot_user_id_from_token, parse_telegram_update, TelegramChatTransport};
use tokio::net::TcpListener;

use crate::bootstrap_helpers::open_state_cache;
use crate::cli_args::{Cli, OAUTH_CALLBACK_PATH};

const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub(crate) struct RelayState {
    pub notifier: GitlabNotifier,
    pub telegram_webhook_secret: Option<String>,
    pub bot_user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct OAuthCallbackQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub(crate) async fn run_relay_server(cli: Cli) -> Result<()> {
    let cache = open_state_cache(&cli.state_dir, &cli.cache_path())?;
    let transport = Arc::new(TelegramChatTransport::new(cli.telegram_config())?);
    let oauth = Arc::new(GitlabOAuthProvider::new(cli.oauth_config(), cache.clone())?);
    let comments = Arc::new(GitlabApiClient::new(cli.api_client_config())?);
    let notifier = GitlabNotifier::new(cli.notifier_config(), transport, oauth, comments, cache);

    let state = Arc::new(RelayState {
        notifier,
        telegram_webhook_secret: cli
            .telegram_webhook_secret
            .as_deref()
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
            .map(str::to_string),
        bot_user_id: bot_user_id_from_token(&cli.telegram_bot_token),
    });

    let listener = TcpListener::bind(cli.bind.as_str())
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve relay server address")?;
    tracing::info!(
        addr = %local_addr,
        public_url = %cli.public_url(),
        cache = %cli.cache_path().display(),
        "tanuki relay listening"
    );

    axum::serve(listener, build_relay_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("tanuki relay server exited unexpectedly")?;
    tracing::info!("tanuki relay stopped");
    Ok(())
}

pub(crate) fn build_relay_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/webhooks/gitlab/{token}", post(handle_gitlab_webhook))
        .route("/webhooks/telegram", post(handle_telegram_webhook))
        .route(OAUTH_CALLBACK_PATH, get(handle_oauth_callback))
        .route("/healthz", get(handle_health))
        .with_state(state)
}

async fn handle_health(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({"status": "ok", "jobs": state.notifier.job_health()})),
    )
}

async fn handle_gitlab_webhook(
    State(state): State<Arc<RelayState>>,
    Path(token): Path<String>,
    body: String,
) -> impl IntoResponse {
    match state.notifier.handle_webhook(&token, &body).await {
        Ok(delivery) => (
            StatusCode::OK,
            Json(json!({"status": "accepted", "outcome": delivery.outcome.as_str()})),
        ),
        Err(WebhookDeliveryError::UnknownToken) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"code": "unknown_token", "message": "unknown webhook token"}})),
        ),
        Err(WebhookDeliveryError::Malformed(error)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": error.reason_code().as_str(), "message": error.to_string()}})),
        ),
        Err(WebhookDeliveryError::Internal(error)) => {
            tracing::error!(error = %format!("{error:#}"), "gitlab webhook delivery failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": {"code": "delivery_failed", "message": "delivery failed"}})),
            )
        }
    }
}

async fn handle_telegram_webhook(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    if let Some(expected_secret) = state.telegram_webhook_secret.as_deref() {
        let observed = headers
            .get(TELEGRAM_SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .unwrap_or("");
        if observed != expected_secret {
            tracing::warn!(reason_code = "auth_failed", "telegram webhook secret mismatch");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"code": "auth_failed", "message": "invalid telegram webhook secret"}})),
            );
        }
    }

    let update = match parse_telegram_update(&body, state.bot_user_id) {
        Ok(Some(update)) => update,
        Ok(None) => return (StatusCode::OK, Json(json!({"status": "ignored"}))),
        Err(error) => {
            tracing::warn!(reason_code = "invalid_update", %error, "dropping telegram update");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": {"code": "invalid_update", "message": error.to_string()}})),
            );
        }
    };

    // Telegram redelivers on non-2xx, so handler failures are logged and acknowledged.
    match state.notifier.handle_chat_update(&update).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({"status": "accepted", "outcome": outcome.as_str()})),
        ),
        Err(error) => {
            tracing::error!(error = %format!("{error:#}"), "telegram update handling failed");
            (StatusCode::OK, Json(json!({"status": "failed"})))
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

async fn handle_oauth_callback(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<OAuthCallbackQuery>,
) -> impl IntoResponse {
    if let Some(error) = query.error.as_deref() {
        tracing::warn!(error, "gitlab oauth authorization denied");
        return (StatusCode::BAD_REQUEST, "Authorization was denied.".to_string());
    }
    let (Some(auth_state), Some(code)) = (
        non_empty(query.state.as_deref()),
        non_empty(query.code.as_deref()),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            "Missing authorization code or state.".to_string(),
        );
    };

    match state.notifier.complete_oauth(auth_state, code).await {
        Ok(Some(completed)) if matches!(completed.outcome, TokenExchangeOutcome::Success(_)) => (
            StatusCode::OK,
            "Authorized. You can return to Telegram now.".to_string(),
        ),
        Ok(Some(_)) => (
            StatusCode::BAD_REQUEST,
            "GitLab rejected the authorization code. Please try again.".to_string(),
        ),
        Ok(None) => (
            StatusCode::BAD_REQUEST,
            "Unknown or expired authorization request. Reply in Telegram again to get a new link."
                .to_string(),
        ),
        Err(error) => {
            tracing::error!(error = %format!("{error:#}"), "oauth callback failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authorization failed.".to_string(),
            )
        }
    }
}
