//! Source adapters
//!
//! An adapter knows how to acquire one country's tariff schedule, check it,
//! and write it to storage. [`run_adapter`] sequences those stages the same
//! way for every adapter:
//!
//! acquire -> count records -> validate -> persist (only with a store)
//!
//! Every error or panic raised by a stage is converted into a failed
//! [`RunResult`]; the duration and the adapter's cleanup happen on every exit
//! path.

pub mod csv;
pub mod generic;

pub use self::csv::CsvAdapter;
pub use generic::GenericAdapter;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use tariff_common::types::{fields, CountryConfig, SourceConfig, TariffRecord, ValidationIssue};
use tariff_common::{ErrorKind, Result, TariffError};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::catalog::ReferenceCatalog;
use crate::http::HttpFetcher;
use crate::retry::{FetchMetrics, RetryExecutor};
use crate::storage::{DocumentStore, TARIFF_COLLECTION};

/// Issues reported per adapter-level validation, at most
const MAX_ADAPTER_ISSUES: usize = 20;

/// Everything an adapter instance owns: reference metadata, fetch settings,
/// its own retry executor (with its own rate limiter) and HTTP client.
#[derive(Debug)]
pub struct AdapterContext {
    country: CountryConfig,
    config: SourceConfig,
    executor: RetryExecutor,
    http: HttpFetcher,
}

impl AdapterContext {
    /// Resolve `config.source_id` in the catalog.
    ///
    /// Fails with a configuration error if the id is unknown or the
    /// configuration is invalid.
    pub fn new(catalog: &dyn ReferenceCatalog, config: SourceConfig) -> Result<Self> {
        config.validate()?;
        let country = catalog.lookup(&config.source_id).ok_or_else(|| {
            TariffError::config(format!("unknown source id '{}'", config.source_id))
        })?;

        // Canonical id from the catalog, whatever case the caller used
        let config = config.for_source(country.iso2.clone());

        Ok(Self {
            executor: RetryExecutor::from_config(&config),
            http: HttpFetcher::new(&config),
            country,
            config,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.country.iso2
    }

    pub fn name(&self) -> &str {
        &self.country.name_en
    }

    pub fn source_url(&self) -> Option<&Url> {
        self.country.source_url.as_ref()
    }

    pub fn tax_rate(&self) -> f64 {
        self.country.tax_rate
    }

    pub fn blocs(&self) -> &[String] {
        &self.country.blocs
    }

    pub fn priority_tier(&self) -> u8 {
        self.country.priority_tier
    }

    pub fn country(&self) -> &CountryConfig {
        &self.country
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    pub fn http(&self) -> &HttpFetcher {
        &self.http
    }

    pub fn metrics(&self) -> FetchMetrics {
        self.executor.metrics()
    }

    /// Source URL or a configuration error
    pub fn require_source_url(&self) -> Result<&Url> {
        self.source_url().ok_or_else(|| {
            TariffError::config(format!("no source URL configured for {}", self.source_id()))
        })
    }
}

/// Outcome of the acquire stage
#[derive(Debug)]
pub struct AcquisitionResult {
    pub success: bool,
    /// Raw payload; its shape is adapter specific
    pub payload: Option<Value>,
    pub error: Option<TariffError>,
    pub metrics: FetchMetrics,
}

impl AcquisitionResult {
    pub fn ok(payload: Value, metrics: FetchMetrics) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
            metrics,
        }
    }

    pub fn failed(error: TariffError, metrics: FetchMetrics) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error),
            metrics,
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn context(&self) -> &AdapterContext;

    /// Short adapter type name, e.g. "generic"
    fn kind(&self) -> &'static str;

    async fn acquire(&self) -> Result<AcquisitionResult>;

    /// Map the payload into records
    fn records(&self, payload: &Value) -> Vec<TariffRecord> {
        extract_records(payload)
    }

    /// Source-specific structural check
    async fn validate(&self, payload: &Value) -> Result<(bool, Vec<ValidationIssue>)> {
        Ok(check_records(&self.records(payload)))
    }

    /// Write the payload's records; returns how many were written
    async fn persist(&self, payload: &Value, store: &dyn DocumentStore) -> Result<usize> {
        persist_records(self.context(), &self.records(payload), store).await
    }

    /// Release held resources. Called after every run.
    async fn cleanup(&self) {
        self.context().http().close();
    }

    fn source_id(&self) -> &str {
        self.context().source_id()
    }
}

/// Records from `{"tariffs": [...]}`, `{"records": [...]}` or a bare array
pub fn extract_records(payload: &Value) -> Vec<TariffRecord> {
    let items = match payload {
        Value::Array(items) => Some(items),
        Value::Object(map) => map
            .get("tariffs")
            .or_else(|| map.get("records"))
            .and_then(Value::as_array),
        _ => None,
    };

    items
        .map(|items| {
            items
                .iter()
                .cloned()
                .filter_map(TariffRecord::from_value)
                .collect()
        })
        .unwrap_or_default()
}

/// Default structural check: a non-empty batch where at least one record
/// carries a code. Records without a code are reported.
pub fn check_records(records: &[TariffRecord]) -> (bool, Vec<ValidationIssue>) {
    if records.is_empty() {
        return (false, vec![ValidationIssue::error("payload contains no records")]);
    }

    let missing: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.is_present(fields::CODE))
        .map(|(i, _)| i)
        .collect();

    let mut issues: Vec<ValidationIssue> = missing
        .iter()
        .take(MAX_ADAPTER_ISSUES)
        .map(|i| {
            ValidationIssue::warning(format!("record {} has no code", i)).field(fields::CODE)
        })
        .collect();

    let valid = missing.len() < records.len();
    if !valid {
        issues.push(ValidationIssue::error("no record carries a code").field(fields::CODE));
    }
    (valid, issues)
}

/// Upsert every record with a code under `{country, code}`
pub async fn persist_records(
    ctx: &AdapterContext,
    records: &[TariffRecord],
    store: &dyn DocumentStore,
) -> Result<usize> {
    let mut written = 0;
    for record in records {
        let Some(code) = record.normalized_code() else {
            continue;
        };
        let key = json!({ "country": ctx.source_id(), "code": code });
        let mut document = record.clone();
        document.insert("country", ctx.source_id());
        document.insert("stored_at", chrono::Utc::now().to_rfc3339());

        store
            .upsert(TARIFF_COLLECTION, &key, document.into_value())
            .await
            .map_err(|e| match e {
                TariffError::Persistence(_) => e,
                other => TariffError::Persistence(other.to_string()),
            })?;
        written += 1;
    }
    Ok(written)
}

/// Result of one adapter run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub source_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub records_acquired: usize,
    pub records_validated: usize,
    pub records_persisted: usize,
    pub duration_ms: u64,
    pub metrics: FetchMetrics,
    /// Issues from the adapter's own validate stage
    pub issues: Vec<ValidationIssue>,
    /// Non-fatal problems, e.g. a skipped write
    pub warnings: Vec<String>,
    /// The acquired batch, handed to the validation pipeline
    #[serde(skip)]
    pub records: Vec<TariffRecord>,
}

impl RunResult {
    fn fail(&mut self, err: &TariffError) {
        self.success = false;
        self.error = Some(err.to_string());
        self.error_kind = Some(err.kind());
        if let TariffError::ValidationFailure { issues, .. } = err {
            self.issues = issues.clone();
        }
    }
}

/// How a run treats storage
#[derive(Clone, Copy, Default)]
pub struct RunOptions<'a> {
    pub store: Option<&'a dyn DocumentStore>,
    /// Fail the run when the write fails instead of logging it
    pub require_durable: bool,
}

impl<'a> RunOptions<'a> {
    pub fn with_store(store: &'a dyn DocumentStore) -> Self {
        Self {
            store: Some(store),
            require_durable: false,
        }
    }
}

/// Run the adapter's stages and convert every outcome into a [`RunResult`]
#[instrument(skip_all, fields(source_id = %adapter.source_id(), adapter = adapter.kind()))]
pub async fn run_adapter(adapter: &dyn SourceAdapter, options: RunOptions<'_>) -> RunResult {
    let started = Instant::now();
    let mut result = RunResult {
        source_id: adapter.source_id().to_string(),
        ..Default::default()
    };

    let outcome = AssertUnwindSafe(run_stages(adapter, options, &mut result))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => result.success = true,
        Ok(Err(err)) => {
            warn!(error = %err, kind = %err.kind(), "Adapter run failed");
            result.fail(&err);
        },
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(panic = %message, "Adapter run panicked");
            result.fail(&TariffError::Internal(format!("adapter panicked: {}", message)));
        },
    }

    adapter.cleanup().await;
    result.metrics = adapter.context().metrics();
    result.duration_ms = started.elapsed().as_millis() as u64;

    info!(
        success = result.success,
        acquired = result.records_acquired,
        persisted = result.records_persisted,
        duration_ms = result.duration_ms,
        "Adapter run finished"
    );
    result
}

async fn run_stages(
    adapter: &dyn SourceAdapter,
    options: RunOptions<'_>,
    result: &mut RunResult,
) -> Result<()> {
    let source_id = adapter.source_id().to_string();

    let acquisition = adapter.acquire().await?;
    result.metrics = acquisition.metrics;
    if !acquisition.success {
        return Err(acquisition.error.unwrap_or_else(|| {
            TariffError::EmptyPayload(format!("acquisition for {} reported failure", source_id))
        }));
    }
    let payload = match acquisition.payload {
        Some(payload) if !is_empty_payload(&payload) => payload,
        _ => {
            return Err(TariffError::EmptyPayload(format!(
                "acquisition for {} returned no data",
                source_id
            )))
        },
    };

    let records = adapter.records(&payload);
    result.records_acquired = records.len();
    debug!(records = records.len(), "Payload mapped to records");
    if records.is_empty() {
        return Err(TariffError::EmptyPayload(format!(
            "payload for {} contains no records",
            source_id
        )));
    }
    result.records = records;

    let (valid, issues) = adapter.validate(&payload).await?;
    if !valid {
        return Err(TariffError::ValidationFailure {
            message: format!("{} payload failed source validation", source_id),
            issues,
        });
    }
    result.issues = issues;
    result.records_validated = result.records.len();

    match options.store {
        Some(store) => match adapter.persist(&payload, store).await {
            Ok(written) => result.records_persisted = written,
            Err(err) if !options.require_durable => {
                warn!(error = %err, "Persistence failed, continuing without durable write");
                result.warnings.push(err.to_string());
            },
            Err(err) => return Err(err),
        },
        None => info!("No storage configured, skipping persistence"),
    }

    Ok(())
}

fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
