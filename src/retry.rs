//! Bounded retry with exponential backoff for every remote collaborator call.
//!
//! Rate-limited and server-error responses (429, 500, 502, 503, 504), timeouts, and connection
//! failures are retried; all other statuses are terminal. Waiting goes through a [`Sleeper`] so
//! tests can observe the backoff schedule without sleeping.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Statuses that trigger another attempt.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Timeout and retry settings shared by remote calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `1 + max_retries`.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Growth factor applied per retry.
    pub multiplier: u32,
    /// Upper bound for a single delay.
    pub max_backoff: Duration,
    /// Per-attempt request timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
            max_backoff: Duration::from_secs(30),
            timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Whether the status belongs to the retryable allow-list.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        RETRYABLE_STATUSES.contains(&status.as_u16())
    }
}

/// Errors surfaced once a remote call is classified terminal.
#[derive(Debug, Error)]
pub enum RemoteCallError {
    /// Transport failure that is not retryable, or the request could not be built.
    #[error("request to {endpoint} failed: {source}")]
    Http {
        /// Target of the failing call.
        endpoint: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// Non-retryable status returned by the collaborator.
    #[error("{endpoint} responded with {status}: {body}")]
    Status {
        /// Target of the failing call.
        endpoint: String,
        /// Returned status.
        status: StatusCode,
        /// Response body, kept as the raw diagnostic.
        body: String,
    },
    /// Every attempt hit a retryable condition.
    #[error("{endpoint} still failing after {attempts} attempts: {last}")]
    Exhausted {
        /// Target of the failing call.
        endpoint: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// Diagnostic from the final attempt.
        last: String,
    },
    /// The request body could not be prepared.
    #[error("could not prepare request: {0}")]
    Request(String),
}

/// Suspends the calling task between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

/// Send a request built by `build`, retrying retryable failures per `policy`.
///
/// `build` is invoked once per attempt because multipart bodies cannot be cloned.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    endpoint: &str,
    mut build: F,
) -> Result<Response, RemoteCallError>
where
    F: FnMut() -> Result<RequestBuilder, RemoteCallError>,
{
    let attempts = policy.max_retries.saturating_add(1);
    let mut last = String::new();

    for attempt in 1..=attempts {
        if attempt > 1 {
            let delay = policy.backoff_for(attempt - 1);
            tracing::warn!(
                endpoint,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %last,
                "Retrying remote call"
            );
            sleeper.sleep(delay).await;
        }

        let request = build()?.timeout(policy.timeout);
        match request.send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if !RetryPolicy::is_retryable_status(status) {
                    return Err(RemoteCallError::Status {
                        endpoint: endpoint.to_string(),
                        status,
                        body,
                    });
                }
                last = format!("status {status}: {body}");
            }
            Err(err) if err.is_timeout() || err.is_connect() => {
                last = err.to_string();
            }
            Err(source) => {
                return Err(RemoteCallError::Http {
                    endpoint: endpoint.to_string(),
                    source,
                });
            }
        }
    }

    Err(RemoteCallError::Exhausted {
        endpoint: endpoint.to_string(),
        attempts,
        last,
    })
}
