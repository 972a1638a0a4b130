//! Retry policy shared by the GitLab and Telegram HTTP clients.

use std::time::Duration;

use reqwest::{header::HeaderMap, StatusCode};

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_DOUBLINGS: u32 = 10;

/// Bounded exponential backoff for a single outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Zero attempts or a zero delay are raised to one.
    pub fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms.max(1)),
        }
    }

    pub fn allows_retry_after(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-based). A server hint
    /// is honored but never shortens the base delay.
    pub fn backoff(&self, attempt: usize, server_hint: Option<Duration>) -> Duration {
        match server_hint {
            Some(hint) => hint.max(self.base_delay),
            None => {
                let doublings = u32::try_from(attempt.saturating_sub(1))
                    .unwrap_or(MAX_DOUBLINGS)
                    .min(MAX_DOUBLINGS);
                self.base_delay
                    .saturating_mul(1_u32 << doublings)
                    .min(MAX_BACKOFF)
            }
        }
    }
}

/// Reads a delta-seconds `Retry-After` header. HTTP-date values are ignored.
pub fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub fn is_transient_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

/// Clips a response body for inclusion in an error message.
pub fn clip_error_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
