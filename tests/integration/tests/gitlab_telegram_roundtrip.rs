use std::{path::Path, sync::Arc, time::Duration};

use httpmock::{prelude::*, Mock};
use serde_json::{json, Value};
use tanuki_core::{FileKeyedCache, KeyedCache};
use tanuki_gitlab::{
    ChatUpdate, ChatUpdateOutcome, GitlabApiClient, GitlabApiClientConfig, GitlabNotifier,
    GitlabOAuthConfig, GitlabOAuthProvider, JobQueueConfig, NotifierConfig, OAuthAppCredentials,
    RendererConfig, TokenExchangeOutcome, WebhookOutcome,
};
use tanuki_telegram::{parse_telegram_update, TelegramChatTransport, TelegramTransportConfig};
use tempfile::TempDir;

const GROUP: i64 = -100;
const DEV: i64 = 7;
const BOT_TOKEN: &str = "99:token";
const HOOK_SECRET: &str = "integration-salt";
const APP_ID: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
const APP_SECRET: &str = "fedcba9876543210fedcba9876543210fedcba9876543210fedcba9876543210";

struct Relay {
    gitlab: MockServer,
    telegram: MockServer,
    workspace: TempDir,
}

impl Relay {
    fn start() -> Self {
        Self {
            gitlab: MockServer::start(),
            telegram: MockServer::start(),
            workspace: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn homepage(&self) -> String {
        format!("{}/acme/api", self.gitlab.base_url())
    }

    fn cache_path(&self) -> std::path::PathBuf {
        self.workspace.path().join("cache.json")
    }

    /// Builds a notifier over the workspace cache file, as a fresh process would.
    fn notifier(&self, hosted_app: bool) -> GitlabNotifier {
        build_notifier(
            &self.cache_path(),
            &self.gitlab.base_url(),
            &self.telegram.base_url(),
            hosted_app.then(|| OAuthAppCredentials {
                client_id: APP_ID.to_string(),
                client_secret: APP_SECRET.to_string(),
            }),
        )
    }

    /// The single OAuth `state` currently awaiting its redirect, read from the
    /// persisted cache file.
    fn pending_oauth_state(&self) -> String {
        let raw = std::fs::read_to_string(self.cache_path()).expect("read cache file");
        let state = serde_json::from_str::<Value>(&raw).expect("cache json");
        let pending = state["entries"]
            .as_object()
            .expect("entries")
            .keys()
            .filter_map(|key| key.strip_prefix("svc:oauth_state_"))
            .map(str::to_string)
            .collect::<Vec<_>>();
        assert_eq!(pending.len(), 1, "expected one pending oauth state: {pending:?}");
        pending[0].clone()
    }

    fn group_send(&self, needle: &str, message_id: i64) -> Mock<'_> {
        self.telegram_send(GROUP, needle, message_id)
    }

    fn private_send(&self, needle: &str, message_id: i64) -> Mock<'_> {
        self.telegram_send(DEV, needle, message_id)
    }

    fn telegram_send(&self, chat_id: i64, needle: &str, message_id: i64) -> Mock<'_> {
        let needle = needle.to_string();
        self.telegram.mock(move |when, then| {
            when.method(POST)
                .path(format!("/bot{BOT_TOKEN}/sendMessage"))
                .body_includes(needle.as_str());
            then.status(200).json_body(json!({
                "ok": true,
                "result": {"message_id": message_id, "chat": {"id": chat_id}},
            }));
        })
    }

    fn gitlab_token(&self, code: &str, access_token: &str) -> Mock<'_> {
        let code = format!("\"code\":\"{code}\"");
        let access_token = access_token.to_string();
        self.gitlab.mock(move |when, then| {
            when.method(POST).path("/oauth/token").body_includes(code.as_str());
            then.status(200).json_body(json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": 7200,
            }));
        })
    }

    fn gitlab_current_user(&self, access_token: &str) -> Mock<'_> {
        let bearer = format!("Bearer {access_token}");
        self.gitlab.mock(move |when, then| {
            when.method(GET)
                .path("/api/v4/user")
                .header("authorization", bearer.as_str());
            then.status(200).json_body(json!({
                "id": 31,
                "username": "jane",
                "name": "Jane",
                "email": "jane@example.com",
            }));
        })
    }
}

fn build_notifier(
    cache_path: &Path,
    gitlab_base_url: &str,
    telegram_base_url: &str,
    default_app: Option<OAuthAppCredentials>,
) -> GitlabNotifier {
    let cache: Arc<dyn KeyedCache> =
        Arc::new(FileKeyedCache::load(cache_path.to_path_buf()).expect("load cache"));
    let transport = Arc::new(
        TelegramChatTransport::new(TelegramTransportConfig {
            api_base: telegram_base_url.to_string(),
            bot_token: BOT_TOKEN.to_string(),
            request_timeout_ms: 2_000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
        })
        .expect("telegram transport"),
    );
    let oauth = Arc::new(
        GitlabOAuthProvider::new(
            GitlabOAuthConfig {
                redirect_uri: "https://relay.example.com/oauth/gitlab/callback".to_string(),
                default_base_url: gitlab_base_url.to_string(),
                default_app,
                request_timeout_ms: 2_000,
            },
            cache.clone(),
        )
        .expect("oauth provider"),
    );
    let comments = Arc::new(
        GitlabApiClient::new(GitlabApiClientConfig {
            request_timeout_ms: 2_000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
        })
        .expect("gitlab client"),
    );
    let notifier = GitlabNotifier::new(
        NotifierConfig {
            renderer: RendererConfig {
                default_base_url: gitlab_base_url.to_string(),
                build_correlation_wait: Duration::from_millis(20),
                build_correlation_poll: Duration::from_millis(5),
            },
            jobs: JobQueueConfig {
                retry_unit: Duration::from_millis(5),
                max_attempts: 3,
            },
            hook_secret: HOOK_SECRET.to_string(),
            public_url: "https://relay.example.com".to_string(),
            nick_map_delay: Duration::ZERO,
        },
        transport,
        oauth,
        comments,
        cache,
    );
    notifier.hooks().register(GROUP).expect("register hook");
    notifier
}

fn chat_update(raw: Value) -> ChatUpdate {
    parse_telegram_update(&raw.to_string(), Some(99))
        .expect("valid update")
        .expect("supported update")
}

fn group_message(text: &str, reply_to: Option<i64>) -> ChatUpdate {
    let mut message = json!({
        "message_id": 300,
        "chat": {"id": GROUP, "type": "supergroup"},
        "from": {"id": DEV, "first_name": "Dev", "username": "dev"},
        "text": text,
    });
    if let Some(reply_to) = reply_to {
        message["reply_to_message"] = json!({
            "message_id": reply_to,
            "chat": {"id": GROUP, "type": "supergroup"},
        });
    }
    chat_update(json!({"update_id": 1, "message": message}))
}

fn private_message(text: &str) -> ChatUpdate {
    chat_update(json!({
        "update_id": 2,
        "message": {
            "message_id": 400,
            "chat": {"id": DEV, "type": "private"},
            "from": {"id": DEV, "first_name": "Dev", "username": "dev"},
            "text": text,
        },
    }))
}

fn commit(homepage: &str, id: &str, message: &str, author: &str, email: &str) -> Value {
    json!({
        "id": id,
        "message": message,
        "url": format!("{homepage}/commit/{id}"),
        "author": {"name": author, "email": email},
        "added": [],
        "modified": ["src/lib.rs"],
        "removed": [],
    })
}

fn push_body(homepage: &str, commits: Vec<Value>) -> String {
    json!({
        "object_kind": "push",
        "ref": "refs/heads/main",
        "before": "1111111111111111111111111111111111111111",
        "after": "2222222222222222222222222222222222222222",
        "user_name": "Alice",
        "user_username": "alice",
        "user_email": "alice@example.com",
        "project_id": 15,
        "project": {"path_with_namespace": "acme/api", "web_url": homepage},
        "repository": {"name": "api", "homepage": homepage},
        "commits": commits,
    })
    .to_string()
}

async fn deliver(notifier: &GitlabNotifier, body: &str) -> WebhookOutcome {
    notifier
        .handle_webhook(&tanuki_gitlab::hook_token(HOOK_SECRET, GROUP), body)
        .await
        .expect("webhook delivery")
        .outcome
}

#[tokio::test]
async fn integration_commit_reply_is_posted_after_oauth_callback() {
    let relay = Relay::start();
    let notifier = relay.notifier(true);
    let sha = "abc1234def5678abc1234def5678abc1234def56";

    let notification = relay.group_send("Fix login", 41);
    let outcome = deliver(
        &notifier,
        &push_body(
            &relay.homepage(),
            vec![commit(&relay.homepage(), sha, "Fix login\n", "Alice", "alice@example.com")],
        ),
    )
    .await;
    assert_eq!(outcome, WebhookOutcome::Sent { message_id: 41 });
    notification.assert_calls(1);

    let authorize = relay.private_send("You need to authorize me", 60);
    let outcome = notifier
        .handle_chat_update(&group_message("Looks good to me", Some(41)))
        .await
        .expect("reply");
    assert_eq!(outcome, ChatUpdateOutcome::ReplyResumed);
    authorize.assert_calls(1);

    let token = relay.gitlab_token("code-1", "tok-7");
    let welcome = relay.private_send("Now you can reply", 61);
    let me = relay.gitlab_current_user("tok-7");
    let comment = relay.gitlab.mock(|when, then| {
        when.method(POST)
            .path(format!("/api/v4/projects/15/repository/commits/{sha}/comments"))
            .header("authorization", "Bearer tok-7")
            .body_includes("\"note\":\"Looks good to me\"");
        then.status(201)
            .json_body(json!({"note": "Looks good to me", "created_at": "2024-03-01T09:00:00.000Z"}));
    });

    // A state naming the user directly is not something the relay issued.
    let forged = notifier
        .complete_oauth(&DEV.to_string(), "code-1")
        .await
        .expect("forged oauth");
    assert_eq!(forged, None);

    let state = relay.pending_oauth_state();
    let exchange = notifier
        .complete_oauth(&state, "code-1")
        .await
        .expect("oauth")
        .expect("issued state");
    assert_eq!(exchange.user_id, DEV);
    assert_eq!(exchange.outcome, TokenExchangeOutcome::Success("tok-7".to_string()));
    assert_eq!(
        notifier.complete_oauth(&state, "code-1").await.expect("replay"),
        None
    );
    assert!(notifier.wait_for_jobs(Duration::from_secs(5)).await);

    token.assert_calls(1);
    welcome.assert_calls(1);
    comment.assert_calls(1);
    me.assert_calls(1);
    let health = notifier.job_health();
    assert_eq!(health.succeeded_total, 2);
    assert_eq!(health.dropped_total, 0);

    // Nickname learned from the OAuth round-trip shows up in later pushes.
    let mention = relay.group_send("@dev", 70);
    let later_push = json!({
        "object_kind": "push",
        "ref": "refs/heads/main",
        "after": "3333333333333333333333333333333333333333",
        "user_name": "Jane",
        "user_username": "jane",
        "user_email": "jane@example.com",
        "project_id": 15,
        "repository": {"name": "api", "homepage": relay.homepage()},
        "commits": [commit(
            &relay.homepage(),
            "3333333333333333333333333333333333333333",
            "Docs",
            "Jane",
            "jane@example.com",
        )],
    });
    let outcome = deliver(&notifier, &later_push.to_string()).await;
    assert_eq!(outcome, WebhookOutcome::Sent { message_id: 70 });
    mention.assert_calls(1);
}

#[tokio::test]
async fn functional_multi_commit_reply_survives_restart_and_keeps_the_comment() {
    let relay = Relay::start();
    let homepage = relay.homepage();
    let first = "1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    let second = "2bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    let third = "3ccccccccccccccccccccccccccccccccccccccc";

    {
        let notifier = relay.notifier(true);
        let notification = relay.group_send("pushed", 41);
        let outcome = deliver(
            &notifier,
            &push_body(
                &homepage,
                vec![
                    commit(&homepage, first, "Bump deps", "Alice", "alice@example.com"),
                    commit(&homepage, second, "Extract session store", "Bob", "bob@example.com"),
                    commit(&homepage, third, "Wire session store", "Bob", "bob@example.com"),
                ],
            ),
        )
        .await;
        assert_eq!(outcome, WebhookOutcome::Sent { message_id: 41 });
        notification.assert_calls(1);
    }

    let notifier = relay.notifier(true);
    let prompt = relay.group_send("please specify commit to comment", 45);
    notifier
        .handle_chat_update(&group_message("Nice refactor", Some(41)))
        .await
        .expect("reply");
    prompt.assert_calls(1);

    // The keyboard answer arrives without a reply reference.
    let authorize = relay.private_send("You need to authorize me", 60);
    notifier
        .handle_chat_update(&group_message("Extract session store", None))
        .await
        .expect("commit choice");
    authorize.assert_calls(1);

    relay.gitlab_token("code-2", "tok-8");
    relay.private_send("Now you can reply", 61);
    relay.gitlab_current_user("tok-8");
    let comment = relay.gitlab.mock(|when, then| {
        when.method(POST)
            .path(format!("/api/v4/projects/15/repository/commits/{second}/comments"))
            .body_includes("Nice refactor");
        then.status(201)
            .json_body(json!({"note": "Nice refactor", "created_at": "2024-03-01T09:05:00.000Z"}));
    });
    let state = relay.pending_oauth_state();
    notifier
        .complete_oauth(&state, "code-2")
        .await
        .expect("oauth")
        .expect("issued state");
    assert!(notifier.wait_for_jobs(Duration::from_secs(5)).await);
    comment.assert_calls(1);
}

#[tokio::test]
async fn functional_hosted_instance_registration_then_issue_reply_round_trip() {
    let relay = Relay::start();
    let notifier = relay.notifier(false);
    let homepage = relay.homepage();

    let opened = relay.group_send("opened", 41);
    let issue = json!({
        "object_kind": "issue",
        "user": {"name": "Bob", "username": "bob", "email": "bob@example.com"},
        "project": {"path_with_namespace": "acme/api", "web_url": homepage},
        "repository": {"name": "api", "homepage": homepage},
        "object_attributes": {
            "id": 501,
            "iid": 3,
            "title": "Login fails",
            "description": "",
            "project_id": 15,
            "state": "opened",
            "url": format!("{homepage}/issues/3"),
            "action": "open",
        },
    });
    assert_eq!(
        deliver(&notifier, &issue.to_string()).await,
        WebhookOutcome::Sent { message_id: 41 }
    );
    opened.assert_calls(1);

    let setup = relay.private_send("add oauth application", 50);
    notifier
        .handle_chat_update(&group_message("Please attach logs", Some(41)))
        .await
        .expect("reply");
    setup.assert_calls(1);

    // 63 hex characters: rejected, same step asked again.
    let retry = relay.private_send("Must be a 64 HEX symbols", 51);
    let secret_prompt = relay.private_send("Now write me the", 52);
    notifier
        .handle_chat_update(&private_message(&APP_ID[..63]))
        .await
        .expect("short app id");
    retry.assert_calls(1);
    secret_prompt.assert_calls(0);

    notifier
        .handle_chat_update(&private_message(APP_ID))
        .await
        .expect("app id");
    secret_prompt.assert_calls(1);

    let probe = relay.gitlab.mock(|when, then| {
        when.method(POST)
            .path("/oauth/token")
            .body_includes("\"code\":\"-\"");
        then.status(401)
            .json_body(json!({"error": "invalid_grant", "error_description": "bad code"}));
    });
    let authorize = relay.private_send("You need to authorize me", 53);
    notifier
        .handle_chat_update(&private_message(APP_SECRET))
        .await
        .expect("app secret");
    probe.assert_calls(1);
    authorize.assert_calls(1);

    relay.gitlab_token("code-3", "tok-9");
    relay.private_send("Now you can reply", 54);
    relay.gitlab_current_user("tok-9");
    let note = relay.gitlab.mock(|when, then| {
        when.method(POST)
            .path("/api/v4/projects/15/issues/3/notes")
            .header("authorization", "Bearer tok-9")
            .body_includes("\"body\":\"Please attach logs\"");
        then.status(201).json_body(json!({
            "id": 900,
            "body": "Please attach logs",
            "created_at": "2024-03-01T09:10:00.000Z",
        }));
    });
    let state = relay.pending_oauth_state();
    notifier
        .complete_oauth(&state, "code-3")
        .await
        .expect("oauth")
        .expect("issued state");
    assert!(notifier.wait_for_jobs(Duration::from_secs(5)).await);
    note.assert_calls(1);

    // GitLab echoes the posted note back as a webhook; it must not be relayed.
    let echo = json!({
        "object_kind": "note",
        "user": {"name": "Jane", "username": "jane", "email": "jane@example.com"},
        "project_id": 15,
        "repository": {"name": "api", "homepage": homepage},
        "object_attributes": {
            "id": 900,
            "note": "Please attach logs",
            "noteable_type": "Issue",
            "project_id": 15,
            "created_at": "2024-03-01 09:10:00 UTC",
            "url": format!("{homepage}/issues/3#note_900"),
        },
        "issue": {"id": 501, "iid": 3, "title": "Login fails"},
    });
    assert_eq!(
        deliver(&notifier, &echo.to_string()).await,
        WebhookOutcome::Duplicate
    );
}

#[tokio::test]
async fn regression_build_events_edit_the_push_message_across_deliveries() {
    let relay = Relay::start();
    let notifier = relay.notifier(true);
    let homepage = relay.homepage();
    let sha = "4ddddddddddddddddddddddddddddddddddddddd";

    relay.group_send("pushed", 41);
    deliver(
        &notifier,
        &push_body(
            &homepage,
            vec![commit(&homepage, sha, "Add CI", "Alice", "alice@example.com")],
        ),
    )
    .await;

    let edit = relay.telegram.mock(|when, then| {
        when.method(POST)
            .path(format!("/bot{BOT_TOKEN}/editMessageText"))
            .body_includes("\"message_id\":41")
            .body_includes("allowed to fail");
        then.status(200).json_body(json!({"ok": true, "result": true}));
    });
    let build = json!({
        "object_kind": "build",
        "sha": sha,
        "build_id": 77,
        "build_status": "failed",
        "build_name": "lint",
        "build_stage": "test",
        "build_duration": 4.2,
        "build_allow_failure": true,
        "project_id": 15,
        "user": {"name": "Alice", "username": "alice", "email": "alice@example.com"},
        "repository": {"name": "api", "homepage": homepage},
    });
    assert_eq!(
        deliver(&notifier, &build.to_string()).await,
        WebhookOutcome::Edited { message_id: 41 }
    );
    edit.assert_calls(1);
}
