//! Common types used across the tariff pipeline

mod issue;
mod record;

pub use issue::{Severity, ValidationIssue};
pub use record::{fields, parse_rate, TariffRecord};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::{Result, TariffError};

// ============================================================================
// Reference Catalog Types
// ============================================================================

/// Reference metadata for one country source.
///
/// Owned by the reference catalog; the pipeline only reads it.
///
/// # Examples
///
/// ```rust,ignore
/// use tariff_common::types::CountryConfig;
///
/// let ci = CountryConfig {
///     iso2: "CI".into(),
///     iso3: "CIV".into(),
///     name_en: "Ivory Coast".into(),
///     name_fr: "Côte d'Ivoire".into(),
///     region: "west_africa".into(),
///     blocs: vec!["ECOWAS".into(), "WAEMU".into()],
///     tax_rate: 18.0,
///     source_url: Some("https://douanes.ci/tarif".parse().unwrap()),
///     priority_tier: 1,
///     languages: vec!["fr".into()],
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryConfig {
    /// ISO 3166-1 alpha-2 code, used as the source identifier
    pub iso2: String,

    /// ISO 3166-1 alpha-3 code
    pub iso3: String,

    pub name_en: String,

    pub name_fr: String,

    /// Region key (e.g. "west_africa")
    pub region: String,

    /// Economic blocs the country belongs to (e.g. "ECOWAS")
    #[serde(default)]
    pub blocs: Vec<String>,

    /// Standard consumption tax rate, in percent
    pub tax_rate: f64,

    /// Where the tariff schedule is published
    #[serde(default)]
    pub source_url: Option<Url>,

    /// 1 is the highest priority
    pub priority_tier: u8,

    #[serde(default)]
    pub languages: Vec<String>,
}

impl CountryConfig {
    pub fn in_bloc(&self, bloc: &str) -> bool {
        self.blocs.iter().any(|b| b.eq_ignore_ascii_case(bloc))
    }
}

// ============================================================================
// Per-Source Configuration
// ============================================================================

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_SECS: f64 = 2.0;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_RATE_LIMIT_CALLS: u32 = 10;
pub const DEFAULT_RATE_LIMIT_PERIOD_SECS: f64 = 60.0;

/// Upper bound on `max_retries`; more than this is almost certainly a typo
pub const MAX_RETRIES_CEILING: u32 = 10;

/// Upper bounds keeping every derived `Duration` and backoff representable
pub const MAX_RETRY_BASE_DELAY_SECS: f64 = 3_600.0;
pub const MAX_REQUEST_TIMEOUT_SECS: f64 = 3_600.0;
pub const MAX_RATE_LIMIT_PERIOD_SECS: f64 = 86_400.0;
pub const MAX_RATE_LIMIT_CALLS: u32 = 100_000;

/// Fetch behaviour for one adapter instance. Immutable once the adapter is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_seconds: f64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: f64,

    #[serde(default = "default_rate_limit_calls")]
    pub rate_limit_calls: u32,

    #[serde(default = "default_rate_limit_period")]
    pub rate_limit_period_seconds: f64,

    #[serde(default = "default_true")]
    pub follow_redirects: bool,

    #[serde(default = "default_true")]
    pub verify_ssl: bool,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay() -> f64 {
    DEFAULT_RETRY_BASE_DELAY_SECS
}

fn default_request_timeout() -> f64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_rate_limit_calls() -> u32 {
    DEFAULT_RATE_LIMIT_CALLS
}

fn default_rate_limit_period() -> f64 {
    DEFAULT_RATE_LIMIT_PERIOD_SECS
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    /// Defaults for `source_id`
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_seconds: DEFAULT_RETRY_BASE_DELAY_SECS,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
            rate_limit_calls: DEFAULT_RATE_LIMIT_CALLS,
            rate_limit_period_seconds: DEFAULT_RATE_LIMIT_PERIOD_SECS,
            follow_redirects: true,
            verify_ssl: true,
        }
    }

    /// Same settings, different source
    pub fn for_source(&self, source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_id.trim().is_empty() {
            return Err(TariffError::config("source_id cannot be empty"));
        }
        if self.max_retries > MAX_RETRIES_CEILING {
            return Err(TariffError::config(format!(
                "max_retries ({}) cannot exceed {}",
                self.max_retries, MAX_RETRIES_CEILING
            )));
        }
        check_seconds(
            "retry_base_delay_seconds",
            self.retry_base_delay_seconds,
            true,
            MAX_RETRY_BASE_DELAY_SECS,
        )?;
        check_seconds(
            "request_timeout_seconds",
            self.request_timeout_seconds,
            false,
            MAX_REQUEST_TIMEOUT_SECS,
        )?;
        if self.rate_limit_calls == 0 {
            return Err(TariffError::config(format!(
                "rate_limit_calls must be greater than 0 for source {}",
                self.source_id
            )));
        }
        if self.rate_limit_calls > MAX_RATE_LIMIT_CALLS {
            return Err(TariffError::config(format!(
                "rate_limit_calls ({}) cannot exceed {}",
                self.rate_limit_calls, MAX_RATE_LIMIT_CALLS
            )));
        }
        check_seconds(
            "rate_limit_period_seconds",
            self.rate_limit_period_seconds,
            true,
            MAX_RATE_LIMIT_PERIOD_SECS,
        )?;
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        seconds_to_duration(self.retry_base_delay_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        seconds_to_duration(self.request_timeout_seconds)
    }

    pub fn rate_limit_period(&self) -> Duration {
        seconds_to_duration(self.rate_limit_period_seconds)
    }
}

fn check_seconds(name: &str, value: f64, allow_zero: bool, max: f64) -> Result<()> {
    let above_floor = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !value.is_finite() || !above_floor || value > max {
        return Err(TariffError::config(format!(
            "{} must be {} and at most {}, got {}",
            name,
            if allow_zero { "non-negative" } else { "greater than 0" },
            max,
            value
        )));
    }
    Ok(())
}

/// Negative and NaN become zero; values too large for `Duration` saturate
fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}
