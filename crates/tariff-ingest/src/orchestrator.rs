//! Job orchestration
//!
//! A single job resolves the source's adapter, runs it, scores the acquired
//! batch with the validation pipeline, stores a combined report and notifies.
//! Batches run single jobs concurrently, bounded by a semaphore; a job that
//! errors or panics never affects its siblings.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tariff_common::checksum::fingerprint_records;
use tariff_common::types::Severity;
use tariff_common::{ErrorKind, Result, TariffError};
use tokio::sync::Semaphore;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::adapter::{run_adapter, RunOptions, RunResult};
use crate::baseline::{BaselineProvider, MemoryBaseline};
use crate::config::PipelineConfig;
use crate::jobs::{JobRecord, JobRegistry, JobStatus};
use crate::notify::{Notification, NotificationHub, NotificationKind};
use crate::registry::AdapterRegistry;
use crate::storage::{DocumentStore, REPORT_COLLECTION};
use crate::validation::{ConsistencyContext, PipelineOutcome, ValidationPipeline};

/// Where a combined score falls relative to the two thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationVerdict {
    /// At or above the alert threshold
    Passed,
    /// Accepted, but below the alert threshold
    Alert,
    /// Below the minimum score; the job fails
    Rejected,
}

pub fn classify_outcome(score: f64, min_score: f64, alert_threshold: f64) -> ValidationVerdict {
    if score < min_score {
        ValidationVerdict::Rejected
    } else if score < alert_threshold {
        ValidationVerdict::Alert
    } else {
        ValidationVerdict::Passed
    }
}

/// Result of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub source_id: String,
    pub status: JobStatus,
    pub run: RunResult,
    pub validation: Option<PipelineOutcome>,
    pub verdict: Option<ValidationVerdict>,
    /// Delivery per channel of the closing notification
    pub notifications: HashMap<String, bool>,
}

impl JobOutcome {
    pub fn combined_score(&self) -> Option<f64> {
        self.validation.as_ref().map(|v| v.combined_score)
    }
}

/// Which sources a batch covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSelection {
    Ids(Vec<String>),
    Priority(u8),
    Region(String),
    Bloc(String),
    All,
}

/// Per-source entry of a batch summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub source_id: String,
    pub outcome: Option<JobOutcome>,
    /// Set when the job raised instead of producing an outcome
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub raised_exception: usize,
    pub entries: Vec<BatchEntry>,
}

pub struct JobOrchestrator {
    registry: Arc<AdapterRegistry>,
    validation: ValidationPipeline,
    notifier: NotificationHub,
    store: Option<Arc<dyn DocumentStore>>,
    baseline: Arc<dyn BaselineProvider>,
    jobs: Arc<JobRegistry>,
    config: PipelineConfig,
}

impl JobOrchestrator {
    pub fn new(registry: Arc<AdapterRegistry>, config: PipelineConfig) -> Self {
        Self {
            registry,
            validation: ValidationPipeline::default(),
            notifier: NotificationHub::new(config.notify_timeout()),
            store: None,
            baseline: Arc::new(MemoryBaseline::new()),
            jobs: Arc::new(JobRegistry::new()),
            config,
        }
    }

    pub fn with_validation(mut self, validation: ValidationPipeline) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_notifier(mut self, notifier: NotificationHub) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_baseline(mut self, baseline: Arc<dyn BaselineProvider>) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_jobs(mut self, jobs: Arc<JobRegistry>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Drop job records older than the configured age
    pub fn sweep_jobs(&self) -> usize {
        self.jobs.sweep(self.config.job_max_age())
    }

    fn persistence(&self) -> Option<&dyn DocumentStore> {
        if self.config.persist {
            self.store.as_deref()
        } else {
            None
        }
    }

    /// Run one source end to end.
    ///
    /// Errors only when the source cannot be resolved; every later failure is
    /// reported through the returned outcome.
    pub async fn run_single(&self, source_id: &str, force_generic: bool) -> Result<JobOutcome> {
        let job_id = Uuid::new_v4();
        let source_id = self.canonical_id(source_id);
        let span = info_span!("job", %job_id, source_id = %source_id);
        self.run_job(job_id, &source_id, force_generic).instrument(span).await
    }

    /// Catalog alpha-2 for `source_id`; unknown ids are only trimmed and upper-cased
    fn canonical_id(&self, source_id: &str) -> String {
        self.registry
            .catalog()
            .lookup(source_id)
            .map(|country| country.iso2)
            .unwrap_or_else(|| source_id.trim().to_ascii_uppercase())
    }

    async fn run_job(
        &self,
        job_id: Uuid,
        source_id: &str,
        force_generic: bool,
    ) -> Result<JobOutcome> {
        self.jobs.start(job_id, source_id);
        self.notifier
            .notify(
                Notification::new(
                    NotificationKind::Started,
                    Severity::Info,
                    format!("Job started: {}", source_id),
                    format!("Acquisition for {} started", source_id),
                )
                .with_meta("job_id", job_id.to_string())
                .with_meta("source_id", source_id),
            )
            .await;

        let adapter = match self.registry.resolve(source_id, force_generic) {
            Ok(adapter) => adapter,
            Err(e) => {
                error!(error = %e, "Cannot resolve source");
                self.jobs.update(job_id, |job| {
                    job.errors.push(e.to_string());
                    job.error_kind = Some(e.kind());
                    job.finish(JobStatus::Failed);
                });
                self.notify_failure(job_id, source_id, &e.to_string(), Some(e.kind())).await;
                return Err(e);
            },
        };

        let options = RunOptions {
            store: self.persistence(),
            require_durable: false,
        };
        let mut run = run_adapter(adapter.as_ref(), options).await;
        self.jobs.update(job_id, |job| {
            job.records_acquired = run.records_acquired;
            job.records_validated = run.records_validated;
            job.records_persisted = run.records_persisted;
        });

        if !run.success {
            let message = run.error.clone().unwrap_or_else(|| "run failed".to_string());
            self.jobs.update(job_id, |job| {
                job.errors.push(message.clone());
                job.error_kind = run.error_kind;
                job.finish(JobStatus::Failed);
            });
            let notifications =
                self.notify_failure(job_id, source_id, &message, run.error_kind).await;
            return Ok(JobOutcome {
                job_id,
                source_id: run.source_id.clone(),
                status: JobStatus::Failed,
                run,
                validation: None,
                verdict: None,
                notifications,
            });
        }

        let canonical_id = run.source_id.clone();
        let context = ConsistencyContext {
            historical_rates: self.baseline.historical_rates(&canonical_id),
            reference_rates: self.baseline.reference_rates(&canonical_id),
            ..Default::default()
        }
        .with_blocs(adapter.context().blocs(), &adapter.context().country().region);
        let validation = self.validation.run(&run.records, &context);
        let score = validation.combined_score;

        if let Some(store) = self.persistence() {
            self.persist_report(store, job_id, &run, &validation).await;
        }

        let verdict = classify_outcome(
            score,
            self.config.min_validation_score,
            self.config.validation_alert_threshold,
        );
        info!(score, ?verdict, issues = validation.issue_count(), "Batch scored");

        let status = match verdict {
            ValidationVerdict::Rejected => JobStatus::Failed,
            ValidationVerdict::Alert | ValidationVerdict::Passed => JobStatus::Success,
        };
        self.jobs.update(job_id, |job| {
            job.combined_score = Some(score);
            if status == JobStatus::Failed {
                job.errors.push(format!(
                    "validation score {:.1} below minimum {:.1}",
                    score, self.config.min_validation_score
                ));
                job.error_kind = Some(ErrorKind::ValidationFailure);
            }
            job.finish(status);
        });

        let notification = match verdict {
            ValidationVerdict::Rejected => Notification::new(
                NotificationKind::Failed,
                Severity::Error,
                format!("Validation failure: {}", canonical_id),
                format!(
                    "Score {:.1} is below the minimum of {:.1}",
                    score, self.config.min_validation_score
                ),
            )
            .with_meta("error_kind", ErrorKind::ValidationFailure.as_str()),
            ValidationVerdict::Alert => Notification::new(
                NotificationKind::ValidationIssues,
                Severity::Warning,
                format!("Validation issues: {}", canonical_id),
                format!(
                    "Score {:.1} is below the alert threshold of {:.1}",
                    score, self.config.validation_alert_threshold
                ),
            ),
            ValidationVerdict::Passed => Notification::new(
                NotificationKind::Success,
                Severity::Info,
                format!("Job succeeded: {}", canonical_id),
                format!("{} records acquired, score {:.1}", run.records_acquired, score),
            ),
        };
        let notifications = self
            .notifier
            .notify(
                notification
                    .with_meta("job_id", job_id.to_string())
                    .with_meta("source_id", canonical_id.as_str())
                    .with_meta("score", score)
                    .with_meta("records", run.records_acquired),
            )
            .await;

        if status == JobStatus::Success {
            self.baseline.record_batch(&canonical_id, &run.records);
        }

        // Records are handed to validation and the baseline; the outcome stays small
        run.records.clear();
        Ok(JobOutcome {
            job_id,
            source_id: canonical_id,
            status,
            run,
            validation: Some(validation),
            verdict: Some(verdict),
            notifications,
        })
    }

    async fn notify_failure(
        &self,
        job_id: Uuid,
        source_id: &str,
        message: &str,
        kind: Option<ErrorKind>,
    ) -> HashMap<String, bool> {
        let mut notification = Notification::new(
            NotificationKind::Failed,
            Severity::Error,
            format!("Job failed: {}", source_id),
            message,
        )
        .with_meta("job_id", job_id.to_string())
        .with_meta("source_id", source_id);
        if let Some(kind) = kind {
            notification = notification.with_meta("error_kind", kind.as_str());
        }
        self.notifier.notify(notification).await
    }

    /// Write the combined validation document; failures are only logged
    async fn persist_report(
        &self,
        store: &dyn DocumentStore,
        job_id: Uuid,
        run: &RunResult,
        validation: &PipelineOutcome,
    ) {
        let fingerprint = match fingerprint_records(&run.records) {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                warn!(error = %e, "Cannot fingerprint batch");
                None
            },
        };
        let document = json!({
            "job_id": job_id.to_string(),
            "source_id": run.source_id,
            "validated_at": Utc::now().to_rfc3339(),
            "records_acquired": run.records_acquired,
            "records_persisted": run.records_persisted,
            "combined_score": validation.combined_score,
            "reports": validation.reports,
            "fingerprint": fingerprint,
        });
        let key = json!({ "source_id": run.source_id, "job_id": job_id.to_string() });

        if let Err(e) = store.upsert(REPORT_COLLECTION, &key, document).await {
            warn!(error = %e, "Validation report not stored");
        }
    }

    fn select(&self, selection: &BatchSelection) -> Vec<String> {
        let catalog = self.registry.catalog();
        match selection {
            BatchSelection::Ids(ids) => ids.clone(),
            BatchSelection::Priority(tier) => catalog.list_by_priority(*tier),
            BatchSelection::Region(region) => catalog.list_by_region(region),
            BatchSelection::Bloc(bloc) => catalog.list_by_bloc(bloc),
            BatchSelection::All => catalog.list_all(),
        }
    }

    /// Run every selected source, at most `max_concurrent_jobs` at a time
    pub async fn run_batch(self: &Arc<Self>, selection: BatchSelection) -> BatchSummary {
        let ids = self.select(&selection);
        info!(
            ?selection,
            sources = ids.len(),
            limit = self.config.max_concurrent_jobs,
            "Batch started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let orchestrator = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                let id = id.clone();
                tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            let message = format!("batch semaphore closed: {}", e);
                            return Err(TariffError::Internal(message));
                        },
                    };
                    orchestrator.run_single(&id, false).await
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;

        let mut summary = BatchSummary {
            total: ids.len(),
            ..Default::default()
        };
        for (source_id, joined) in ids.into_iter().zip(results) {
            let entry = match joined {
                Ok(Ok(outcome)) => {
                    match outcome.status {
                        JobStatus::Success => summary.succeeded += 1,
                        _ => summary.failed += 1,
                    }
                    BatchEntry {
                        source_id,
                        outcome: Some(outcome),
                        error: None,
                        error_kind: None,
                    }
                },
                Ok(Err(e)) => {
                    summary.raised_exception += 1;
                    BatchEntry {
                        source_id,
                        outcome: None,
                        error: Some(e.to_string()),
                        error_kind: Some(e.kind()),
                    }
                },
                Err(join_error) => {
                    error!(%source_id, error = %join_error, "Job task aborted");
                    summary.raised_exception += 1;
                    BatchEntry {
                        source_id,
                        outcome: None,
                        error: Some(join_error.to_string()),
                        error_kind: Some(ErrorKind::Internal),
                    }
                },
            };
            summary.entries.push(entry);
        }

        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            raised = summary.raised_exception,
            "Batch finished"
        );
        summary
    }

    /// Latest record of a job
    pub fn job(&self, job_id: Uuid) -> Option<JobRecord> {
        self.jobs.get(job_id)
    }
}
