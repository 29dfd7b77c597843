//! Sliding-window rate limiter
//!
//! Admits at most `max_calls` calls in any trailing window of `period`.
//! Each adapter instance owns its own limiter; the cap is per source instance.
//!
//! Degenerate settings:
//! - `max_calls == 0` never admits anyone (`acquire` stays pending forever).
//!   `SourceConfig::validate` rejects this before an adapter is built.
//! - `period == 0` disables limiting.

use std::collections::VecDeque;
use std::time::Duration;
use tariff_common::types::SourceConfig;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// The window grows on demand past this many slots
const PREALLOCATED_SLOTS: u32 = 1_024;

#[derive(Debug)]
pub struct RateLimiter {
    max_calls: u32,
    period: Duration,
    /// Admission times inside the current window, oldest first
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: u32, period: Duration) -> Self {
        Self {
            max_calls,
            period,
            calls: Mutex::new(VecDeque::with_capacity(max_calls.min(PREALLOCATED_SLOTS) as usize)),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.rate_limit_calls, config.rate_limit_period())
    }

    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait until one more call fits in the window, then record it.
    ///
    /// Returns `true` if the caller had to wait. The lock is held while
    /// sleeping so concurrent callers are admitted in arrival order.
    pub async fn acquire(&self) -> bool {
        if self.max_calls == 0 {
            debug!("Rate limiter configured with zero calls; blocking indefinitely");
            std::future::pending::<()>().await;
        }
        if self.period.is_zero() {
            return false;
        }

        let mut calls = self.calls.lock().await;
        let mut waited = false;

        loop {
            let now = Instant::now();
            evict_expired(&mut calls, now, self.period);

            if calls.len() < self.max_calls as usize {
                calls.push_back(now);
                return waited;
            }

            // Window is full; the oldest entry decides when a slot frees up.
            let wait = match calls.front() {
                Some(oldest) => oldest
                    .checked_add(self.period)
                    .map(|free_at| free_at.saturating_duration_since(now))
                    .unwrap_or(self.period),
                None => Duration::ZERO,
            };
            debug!(
                wait_ms = wait.as_millis() as u64,
                in_window = calls.len(),
                "Rate limit reached, waiting for a free slot"
            );
            waited = true;
            sleep(wait).await;
        }
    }

    /// Calls currently counted against the window
    pub async fn in_window(&self) -> usize {
        let mut calls = self.calls.lock().await;
        evict_expired(&mut calls, Instant::now(), self.period);
        calls.len()
    }
}

fn evict_expired(calls: &mut VecDeque<Instant>, now: Instant, period: Duration) {
    while let Some(oldest) = calls.front() {
        if now.saturating_duration_since(*oldest) >= period {
            calls.pop_front();
        } else {
            break;
        }
    }
}
