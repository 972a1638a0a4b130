use std::{path::PathBuf, time::Duration};

use clap::Parser;
use tanuki_gitlab::{
    GitlabApiClientConfig, GitlabOAuthConfig, JobQueueConfig, NotifierConfig, OAuthAppCredentials,
    RendererConfig, NICK_MAP_DELAY,
};
use tanuki_telegram::TelegramTransportConfig;

pub(crate) const OAUTH_CALLBACK_PATH: &str = "/oauth/gitlab/callback";
const CACHE_FILE_NAME: &str = "cache.json";

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u32(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "tanuki",
    about = "Relays GitLab webhooks to Telegram chats and posts chat replies back as GitLab comments",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long = "bind",
        env = "TANUKI_BIND",
        default_value = "127.0.0.1:8080",
        help = "Socket address the HTTP server listens on"
    )]
    pub bind: String,

    #[arg(
        long = "public-url",
        env = "TANUKI_PUBLIC_URL",
        help = "Externally reachable base URL used in hook URLs and the OAuth redirect URI"
    )]
    pub public_url: Option<String>,

    #[arg(
        long = "telegram-bot-token",
        env = "TANUKI_TELEGRAM_BOT_TOKEN",
        hide_env_values = true,
        help = "Telegram bot token"
    )]
    pub telegram_bot_token: String,

    #[arg(
        long = "telegram-api-base",
        env = "TANUKI_TELEGRAM_API_BASE",
        default_value = "https://api.telegram.org",
        help = "Telegram Bot API base URL"
    )]
    pub telegram_api_base: String,

    #[arg(
        long = "telegram-webhook-secret",
        env = "TANUKI_TELEGRAM_WEBHOOK_SECRET",
        hide_env_values = true,
        help = "Expected x-telegram-bot-api-secret-token header on Telegram webhook deliveries"
    )]
    pub telegram_webhook_secret: Option<String>,

    #[arg(
        long = "gitlab-base-url",
        env = "TANUKI_GITLAB_BASE_URL",
        default_value = "https://gitlab.com",
        help = "GitLab instance used when a webhook carries no usable URL"
    )]
    pub gitlab_base_url: String,

    #[arg(
        long = "gitlab-oauth-client-id",
        env = "TANUKI_GITLAB_OAUTH_CLIENT_ID",
        requires = "gitlab_oauth_client_secret",
        help = "OAuth application id registered on the default GitLab instance"
    )]
    pub gitlab_oauth_client_id: Option<String>,

    #[arg(
        long = "gitlab-oauth-client-secret",
        env = "TANUKI_GITLAB_OAUTH_CLIENT_SECRET",
        hide_env_values = true,
        requires = "gitlab_oauth_client_id",
        help = "OAuth application secret registered on the default GitLab instance"
    )]
    pub gitlab_oauth_client_secret: Option<String>,

    #[arg(
        long = "hook-secret",
        env = "TANUKI_HOOK_SECRET",
        hide_env_values = true,
        help = "Salt for per-chat GitLab webhook tokens"
    )]
    pub hook_secret: String,

    #[arg(
        long = "state-dir",
        env = "TANUKI_STATE_DIR",
        default_value = ".tanuki",
        help = "Directory holding the persistent cache"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "job-retry-unit-ms",
        env = "TANUKI_JOB_RETRY_UNIT_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Base unit multiplied by the fibonacci sequence between job retries"
    )]
    pub job_retry_unit_ms: u64,

    #[arg(
        long = "job-max-attempts",
        env = "TANUKI_JOB_MAX_ATTEMPTS",
        default_value_t = 10,
        value_parser = parse_positive_u32,
        help = "Attempts before a queued job is dropped"
    )]
    pub job_max_attempts: u32,

    #[arg(
        long = "build-correlation-wait-ms",
        env = "TANUKI_BUILD_CORRELATION_WAIT_MS",
        default_value_t = 1_000,
        help = "How long a CI event waits for its push notification before rendering standalone"
    )]
    pub build_correlation_wait_ms: u64,

    #[arg(
        long = "build-correlation-poll-ms",
        env = "TANUKI_BUILD_CORRELATION_POLL_MS",
        default_value_t = 250,
        value_parser = parse_positive_u64,
        help = "Poll interval while waiting for a push notification"
    )]
    pub build_correlation_poll_ms: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "TANUKI_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for outbound GitLab and Telegram requests"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "log-filter",
        env = "TANUKI_LOG_FILTER",
        default_value = "info",
        help = "Tracing filter directive used when RUST_LOG is unset"
    )]
    pub log_filter: String,
}

impl Cli {
    pub(crate) fn public_url(&self) -> String {
        match self.public_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("http://{}", self.bind.trim()),
        }
    }

    pub(crate) fn cache_path(&self) -> PathBuf {
        self.state_dir.join(CACHE_FILE_NAME)
    }

    pub(crate) fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            renderer: RendererConfig {
                default_base_url: self.gitlab_base_url.trim_end_matches('/').to_string(),
                build_correlation_wait: Duration::from_millis(self.build_correlation_wait_ms),
                build_correlation_poll: Duration::from_millis(self.build_correlation_poll_ms),
            },
            jobs: JobQueueConfig {
                retry_unit: Duration::from_millis(self.job_retry_unit_ms),
                max_attempts: self.job_max_attempts,
            },
            hook_secret: self.hook_secret.clone(),
            public_url: self.public_url(),
            nick_map_delay: NICK_MAP_DELAY,
        }
    }

    pub(crate) fn oauth_config(&self) -> GitlabOAuthConfig {
        let default_app = match (
            self.gitlab_oauth_client_id.as_deref(),
            self.gitlab_oauth_client_secret.as_deref(),
        ) {
            (Some(client_id), Some(client_secret)) => Some(OAuthAppCredentials {
                client_id: client_id.trim().to_string(),
                client_secret: client_secret.trim().to_string(),
            }),
            _ => None,
        };
        GitlabOAuthConfig {
            redirect_uri: format!("{}{OAUTH_CALLBACK_PATH}", self.public_url()),
            default_base_url: self.gitlab_base_url.trim_end_matches('/').to_string(),
            default_app,
            request_timeout_ms: self.request_timeout_ms,
        }
    }

    pub(crate) fn api_client_config(&self) -> GitlabApiClientConfig {
        GitlabApiClientConfig {
            request_timeout_ms: self.request_timeout_ms,
            ..GitlabApiClientConfig::default()
        }
    }

    pub(crate) fn telegram_config(&self) -> TelegramTransportConfig {
        TelegramTransportConfig {
            api_base: self.telegram_api_base.clone(),
            bot_token: self.telegram_bot_token.clone(),
            request_timeout_ms: self.request_timeout_ms,
            ..TelegramTransportConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        let mut args = vec![
            "tanuki",
            "--telegram-bot-token",
            "123:abc",
            "--hook-secret",
            "salt",
        ];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args)
    }

    #[test]
    fn unit_defaults_match_documented_values() {
        let cli = parse(&[]).expect("parse");
        assert_eq!(cli.bind, "127.0.0.1:8080");
        assert_eq!(cli.log_filter, "info");
        assert_eq!(cli.public_url(), "http://127.0.0.1:8080");
        assert_eq!(cli.cache_path(), PathBuf::from(".tanuki").join("cache.json"));

        let config = cli.notifier_config();
        assert_eq!(config.jobs.max_attempts, 10);
        assert_eq!(config.jobs.retry_unit, Duration::from_secs(1));
        assert_eq!(config.renderer.default_base_url, "https://gitlab.com");
        assert_eq!(config.renderer.build_correlation_poll, Duration::from_millis(250));
    }

    #[test]
    fn functional_public_url_drives_oauth_redirect() {
        let cli = parse(&[
            "--public-url",
            "https://relay.example.com/",
            "--gitlab-oauth-client-id",
            "id",
            "--gitlab-oauth-client-secret",
            "secret",
        ])
        .expect("parse");
        let oauth = cli.oauth_config();
        assert_eq!(
            oauth.redirect_uri,
            "https://relay.example.com/oauth/gitlab/callback"
        );
        assert_eq!(
            oauth.default_app,
            Some(OAuthAppCredentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            })
        );
    }

    #[test]
    fn regression_zero_retry_settings_are_rejected() {
        assert!(parse(&["--job-max-attempts", "0"]).is_err());
        assert!(parse(&["--job-retry-unit-ms", "0"]).is_err());
        assert!(parse(&["--gitlab-oauth-client-id", "only-id"]).is_err());
    }
}
