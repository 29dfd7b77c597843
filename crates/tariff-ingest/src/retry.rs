//! Retrying executor for outbound fetches
//!
//! Runs an operation up to `max_retries + 1` times. Permanent failures
//! (4xx other than 429) stop immediately; transient ones (429, 5xx,
//! timeouts, connection errors) are retried after `base_delay * 2^k`.
//! The rate limiter is acquired before every attempt, so retries count
//! against the source's call budget like any other request.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tariff_common::types::SourceConfig;
use tariff_common::TariffError;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::rate_limit::RateLimiter;

/// Attempts kept for diagnostics per executor
const ATTEMPT_LOG_CAPACITY: usize = 200;

/// Classified failure of a single outbound attempt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("transient failure: {message}")]
    Transient { message: String, status: Option<u16> },

    #[error("permanent failure: {message}")]
    Permanent { message: String, status: Option<u16> },
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        FetchError::Transient {
            message: message.into(),
            status: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        FetchError::Permanent {
            message: message.into(),
            status: None,
        }
    }

    /// Classify a non-success HTTP status. 429 and 5xx are transient.
    pub fn from_status(status: u16, context: &str) -> Self {
        let message = format!("HTTP {} from {}", status, context);
        if status == 429 || (500..=599).contains(&status) {
            FetchError::Transient {
                message,
                status: Some(status),
            }
        } else {
            FetchError::Permanent {
                message,
                status: Some(status),
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Transient { status, .. } | FetchError::Permanent { status, .. } => *status,
        }
    }

    fn outcome(&self) -> AttemptOutcome {
        if self.is_transient() {
            AttemptOutcome::TransientFailure
        } else {
            AttemptOutcome::PermanentFailure
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let mut classified = FetchError::from_status(status.as_u16(), "server");
            if let FetchError::Transient { message, .. } | FetchError::Permanent { message, .. } =
                &mut classified
            {
                *message = err.to_string();
            }
            return classified;
        }

        let message = err.to_string();
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            FetchError::transient(message)
        } else {
            // builder, redirect-policy and decode errors repeat on every attempt
            FetchError::permanent(message)
        }
    }
}

impl From<FetchError> for TariffError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Transient { message, status } => {
                TariffError::TransientFetch { message, status }
            },
            FetchError::Permanent { message, status } => {
                TariffError::PermanentFetch { message, status }
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
}

/// One outbound attempt, as recorded by the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub method: String,
    pub url: String,
    /// Zero-based attempt index within one logical operation
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub status: Option<u16>,
    pub elapsed_ms: u64,
}

/// Counters accumulated over the lifetime of one executor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMetrics {
    pub requests_made: u64,
    pub requests_failed: u64,
    pub retries_attempted: u64,
    pub rate_limits_hit: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests_made: AtomicU64,
    requests_failed: AtomicU64,
    retries_attempted: AtomicU64,
    rate_limits_hit: AtomicU64,
}

#[derive(Debug)]
pub struct RetryExecutor {
    limiter: RateLimiter,
    max_retries: u32,
    base_delay: Duration,
    counters: Counters,
    attempts: Mutex<VecDeque<FetchAttempt>>,
}

impl RetryExecutor {
    pub fn new(limiter: RateLimiter, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            limiter,
            max_retries,
            base_delay,
            counters: Counters::default(),
            attempts: Mutex::new(VecDeque::new()),
        }
    }

    /// Executor with its own rate limiter built from `config`
    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(
            RateLimiter::from_config(config),
            config.max_retries,
            config.retry_base_delay(),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry `k` (zero-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        2u32.checked_pow(retry)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out.
    ///
    /// `operation` receives the zero-based attempt index. On exhaustion the
    /// last observed error is returned.
    pub async fn execute<T, F, Fut>(
        &self,
        method: &str,
        url: &str,
        mut operation: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let total_attempts = self.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 0..total_attempts {
            if self.limiter.acquire().await {
                self.counters.rate_limits_hit.fetch_add(1, Ordering::Relaxed);
            }
            self.counters.requests_made.fetch_add(1, Ordering::Relaxed);

            let started = Instant::now();
            let result = operation(attempt).await;
            let elapsed = started.elapsed();

            match result {
                Ok(value) => {
                    self.record(method, url, attempt, AttemptOutcome::Success, None, elapsed);
                    debug!(method, url, attempt, "Fetch succeeded");
                    return Ok(value);
                },
                Err(err) => {
                    self.counters.requests_failed.fetch_add(1, Ordering::Relaxed);
                    self.record(method, url, attempt, err.outcome(), err.status(), elapsed);

                    if !err.is_transient() {
                        warn!(
                            method,
                            url,
                            attempt,
                            error = %err,
                            "Permanent failure, not retrying"
                        );
                        return Err(err);
                    }

                    if attempt + 1 < total_attempts {
                        let delay = self.backoff(attempt);
                        self.counters.retries_attempted.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            method,
                            url,
                            attempt = attempt + 1,
                            of = total_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Fetch attempt failed, backing off"
                        );
                        sleep(delay).await;
                    } else {
                        warn!(
                            method,
                            url,
                            attempts = total_attempts,
                            error = %err,
                            "Retries exhausted"
                        );
                    }
                    last_error = Some(err);
                },
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::transient("no attempt was made")))
    }

    pub fn metrics(&self) -> FetchMetrics {
        FetchMetrics {
            requests_made: self.counters.requests_made.load(Ordering::Relaxed),
            requests_failed: self.counters.requests_failed.load(Ordering::Relaxed),
            retries_attempted: self.counters.retries_attempted.load(Ordering::Relaxed),
            rate_limits_hit: self.counters.rate_limits_hit.load(Ordering::Relaxed),
        }
    }

    /// Most recent attempts, oldest first
    pub fn attempts(&self) -> Vec<FetchAttempt> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn record(
        &self,
        method: &str,
        url: &str,
        attempt: u32,
        outcome: AttemptOutcome,
        status: Option<u16>,
        elapsed: Duration,
    ) {
        let mut log = self
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if log.len() >= ATTEMPT_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(FetchAttempt {
            method: method.to_string(),
            url: url.to_string(),
            attempt,
            outcome,
            status,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }
}
