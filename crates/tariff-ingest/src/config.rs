//! Pipeline configuration
//!
//! Loaded from `TARIFF_*` environment variables (a `.env` file is honoured by
//! the binary through dotenvy). Unset or unparsable values fall back to the
//! defaults below; inconsistent combinations are rejected by `validate()`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tariff_common::types::SourceConfig;

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 5;
pub const DEFAULT_MIN_VALIDATION_SCORE: f64 = 70.0;
pub const DEFAULT_VALIDATION_ALERT_THRESHOLD: f64 = 80.0;
pub const DEFAULT_JOB_MAX_AGE_HOURS: i64 = 24;
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent single runs inside one batch
    pub max_concurrent_jobs: usize,
    /// Below this combined score a job fails
    pub min_validation_score: f64,
    /// Below this combined score a successful job raises a validation alert
    pub validation_alert_threshold: f64,
    /// Age after which job records are swept
    pub job_max_age_hours: i64,
    /// Write records and reports to the configured store
    pub persist: bool,
    /// Per-channel notification timeout
    pub notify_timeout_secs: u64,
    pub webhook_url: Option<String>,
    /// Fetch settings applied to every source
    pub source_defaults: SourceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            min_validation_score: DEFAULT_MIN_VALIDATION_SCORE,
            validation_alert_threshold: DEFAULT_VALIDATION_ALERT_THRESHOLD,
            job_max_age_hours: DEFAULT_JOB_MAX_AGE_HOURS,
            persist: true,
            notify_timeout_secs: DEFAULT_NOTIFY_TIMEOUT_SECS,
            webhook_url: None,
            source_defaults: SourceConfig::new("default"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = SourceConfig::new("default");
        let source_defaults = SourceConfig {
            max_retries: env_parse("TARIFF_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_base_delay_seconds: env_parse("TARIFF_RETRY_BASE_DELAY_SECS")
                .unwrap_or(defaults.retry_base_delay_seconds),
            request_timeout_seconds: env_parse("TARIFF_REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_seconds),
            rate_limit_calls: env_parse("TARIFF_RATE_LIMIT_CALLS")
                .unwrap_or(defaults.rate_limit_calls),
            rate_limit_period_seconds: env_parse("TARIFF_RATE_LIMIT_PERIOD_SECS")
                .unwrap_or(defaults.rate_limit_period_seconds),
            follow_redirects: env_parse("TARIFF_FOLLOW_REDIRECTS")
                .unwrap_or(defaults.follow_redirects),
            verify_ssl: env_parse("TARIFF_VERIFY_SSL").unwrap_or(defaults.verify_ssl),
            ..defaults
        };

        let config = Self {
            max_concurrent_jobs: env_parse("TARIFF_MAX_CONCURRENT_JOBS")
                .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS),
            min_validation_score: env_parse("TARIFF_MIN_VALIDATION_SCORE")
                .unwrap_or(DEFAULT_MIN_VALIDATION_SCORE),
            validation_alert_threshold: env_parse("TARIFF_VALIDATION_ALERT_THRESHOLD")
                .unwrap_or(DEFAULT_VALIDATION_ALERT_THRESHOLD),
            job_max_age_hours: env_parse("TARIFF_JOB_MAX_AGE_HOURS")
                .unwrap_or(DEFAULT_JOB_MAX_AGE_HOURS),
            persist: env_parse("TARIFF_PERSIST").unwrap_or(true),
            notify_timeout_secs: env_parse("TARIFF_NOTIFY_TIMEOUT_SECS")
                .unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS),
            webhook_url: std::env::var("TARIFF_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            source_defaults,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("TARIFF_MAX_CONCURRENT_JOBS must be greater than 0");
        }
        for (name, score) in [
            ("TARIFF_MIN_VALIDATION_SCORE", self.min_validation_score),
            ("TARIFF_VALIDATION_ALERT_THRESHOLD", self.validation_alert_threshold),
        ] {
            if !(0.0..=100.0).contains(&score) {
                anyhow::bail!("{} must be between 0 and 100, got {}", name, score);
            }
        }
        if self.min_validation_score > self.validation_alert_threshold {
            anyhow::bail!(
                "TARIFF_MIN_VALIDATION_SCORE ({}) exceeds TARIFF_VALIDATION_ALERT_THRESHOLD ({})",
                self.min_validation_score,
                self.validation_alert_threshold
            );
        }
        if self.job_max_age_hours <= 0 {
            anyhow::bail!("TARIFF_JOB_MAX_AGE_HOURS must be greater than 0");
        }
        if self.notify_timeout_secs == 0 {
            anyhow::bail!("TARIFF_NOTIFY_TIMEOUT_SECS must be greater than 0");
        }
        self.source_defaults.validate()?;
        Ok(())
    }

    pub fn job_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.job_max_age_hours)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}
