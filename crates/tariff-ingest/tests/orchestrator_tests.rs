//! End-to-end job and batch runs against mocked country sources

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{catalog_for, pipeline_config, serve_json, serve_status, tariff_lines, Harness};
use serde_json::json;
use std::sync::Arc;
use tariff_common::{ErrorKind, Result};
use tariff_ingest::adapter::{AcquisitionResult, AdapterContext, SourceAdapter};
use tariff_ingest::baseline::{BaselineProvider, MemoryBaseline};
use tariff_ingest::jobs::JobStatus;
use tariff_ingest::notify::NotificationKind;
use tariff_ingest::orchestrator::{BatchSelection, ValidationVerdict};
use tariff_ingest::storage::{REPORT_COLLECTION, TARIFF_COLLECTION};
use tariff_ingest::validation::ValidatorKind;
use wiremock::MockServer;

#[tokio::test]
async fn test_successful_job_persists_and_notifies() {
    let server = MockServer::start().await;
    serve_json(&server, "CI", tariff_lines(30)).await;

    let harness = Harness::new(catalog_for(&server, &[("CI", "CIV")]), pipeline_config(0.0, 0.0));
    let outcome = harness.orchestrator.run_single("civ", false).await.unwrap();

    assert_eq!(outcome.source_id, "CI");
    assert_eq!(outcome.status, JobStatus::Success);
    assert_eq!(outcome.verdict, Some(ValidationVerdict::Passed));
    assert_eq!(outcome.run.records_acquired, 30);
    assert_eq!(outcome.run.records_persisted, 30);
    assert!(outcome.run.records.is_empty());

    let validation = outcome.validation.as_ref().unwrap();
    assert_eq!(validation.reports.len(), 3);
    assert!(validation.report(ValidatorKind::Consistency).is_some());

    assert_eq!(harness.store.count(TARIFF_COLLECTION), 30);
    assert_eq!(harness.store.count(REPORT_COLLECTION), 1);
    assert_eq!(
        harness.notifier.kinds(),
        vec![NotificationKind::Started, NotificationKind::Success]
    );
    assert_eq!(outcome.notifications.get("memory"), Some(&true));

    let job = harness.orchestrator.job(outcome.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.combined_score, outcome.combined_score());
    assert!(job.ended_at.is_some());
}

#[tokio::test]
async fn test_score_below_minimum_fails_job() {
    let server = MockServer::start().await;
    serve_json(&server, "CI", tariff_lines(10)).await;

    // Ten lines miss the coverage minimum, so the score cannot reach 100
    let catalog = catalog_for(&server, &[("CI", "CIV")]);
    let harness = Harness::new(catalog, pipeline_config(100.0, 100.0));
    let outcome = harness.orchestrator.run_single("CI", false).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.verdict, Some(ValidationVerdict::Rejected));
    assert!(outcome.combined_score().unwrap() < 100.0);
    assert_eq!(
        harness.notifier.kinds(),
        vec![NotificationKind::Started, NotificationKind::Failed]
    );
    let failure = &harness.notifier.sent()[1];
    assert_eq!(failure.metadata.get("error_kind"), Some(&json!("validation_failure")));

    let job = harness.orchestrator.job(outcome.job_id).unwrap();
    assert_eq!(job.error_kind, Some(ErrorKind::ValidationFailure));
}

#[tokio::test]
async fn test_score_below_alert_threshold_raises_alert() {
    let server = MockServer::start().await;
    serve_json(&server, "CI", tariff_lines(10)).await;

    let harness = Harness::new(catalog_for(&server, &[("CI", "CIV")]), pipeline_config(0.0, 100.0));
    let outcome = harness.orchestrator.run_single("CI", false).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Success);
    assert_eq!(outcome.verdict, Some(ValidationVerdict::Alert));
    assert_eq!(
        harness.notifier.kinds(),
        vec![NotificationKind::Started, NotificationKind::ValidationIssues]
    );
}

#[tokio::test]
async fn test_batch_between_thresholds_succeeds_with_alert() {
    let server = MockServer::start().await;
    let known = [("CI", "CIV"), ("SN", "SEN")];
    for (iso2, _) in known {
        serve_json(&server, iso2, tariff_lines(10)).await;
    }

    // Score the batch once, then place the thresholds on either side of it
    let scoring = Harness::new(catalog_for(&server, &known), pipeline_config(0.0, 0.0));
    let score = scoring
        .orchestrator
        .run_single("CI", false)
        .await
        .unwrap()
        .combined_score()
        .unwrap();
    assert!(score > 0.0 && score < 100.0, "score {}", score);

    let harness = Harness::new(catalog_for(&server, &known), pipeline_config(score / 2.0, 100.0));
    let ids = vec!["CI".to_string(), "SN".to_string()];
    let summary = harness.orchestrator.run_batch(BatchSelection::Ids(ids)).await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    for entry in &summary.entries {
        let outcome = entry.outcome.as_ref().unwrap();
        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.verdict, Some(ValidationVerdict::Alert));
        assert_eq!(harness.orchestrator.job(outcome.job_id).unwrap().status, JobStatus::Success);
    }

    let kinds = harness.notifier.kinds();
    let count = |kind: NotificationKind| kinds.iter().filter(|k| **k == kind).count();
    assert_eq!(count(NotificationKind::Started), 2);
    assert_eq!(count(NotificationKind::ValidationIssues), 2);
    assert_eq!(count(NotificationKind::Success), 0);
    assert_eq!(count(NotificationKind::Failed), 0);
}

#[tokio::test]
async fn test_job_record_counts_records() {
    let server = MockServer::start().await;
    serve_json(&server, "CI", tariff_lines(12)).await;

    let harness = Harness::new(catalog_for(&server, &[("CI", "CIV")]), pipeline_config(0.0, 0.0));
    let outcome = harness.orchestrator.run_single("CI", false).await.unwrap();

    let job = harness.orchestrator.job(outcome.job_id).unwrap();
    assert_eq!(job.records_acquired, 12);
    assert_eq!(job.records_validated, 12);
    assert_eq!(job.records_persisted, 12);
    assert!(job.errors.is_empty());
    assert_eq!(job.error_kind, None);
}

#[tokio::test]
async fn test_job_records_use_catalog_id() {
    let server = MockServer::start().await;
    serve_json(&server, "CI", tariff_lines(10)).await;

    let harness = Harness::new(catalog_for(&server, &[("CI", "CIV")]), pipeline_config(0.0, 0.0));
    let outcome = harness.orchestrator.run_single(" civ ", false).await.unwrap();

    let job = harness.orchestrator.job(outcome.job_id).unwrap();
    assert_eq!(job.source_id, "CI");
    let started = &harness.notifier.sent()[0];
    assert_eq!(started.kind, NotificationKind::Started);
    assert_eq!(started.metadata.get("source_id"), Some(&json!("CI")));

    // Ids the catalog cannot resolve are still recorded in upper case
    harness.orchestrator.run_single("zz", false).await.unwrap_err();
    let jobs = harness.orchestrator.jobs().list();
    let ids: Vec<String> = jobs.into_iter().map(|j| j.source_id).collect();
    assert!(ids.contains(&"ZZ".to_string()), "{:?}", ids);
    assert!(!ids.iter().any(|id| id == "civ" || id == " civ "));
}

#[tokio::test]
async fn test_sweep_drops_jobs_past_max_age() {
    let server = MockServer::start().await;
    serve_json(&server, "CI", tariff_lines(10)).await;
    serve_json(&server, "SN", tariff_lines(10)).await;
    let catalog = catalog_for(&server, &[("CI", "CIV"), ("SN", "SEN")]);

    let mut config = pipeline_config(0.0, 0.0);
    config.job_max_age_hours = 2;
    let harness = Harness::new(catalog, config);

    let old = harness.orchestrator.run_single("CI", false).await.unwrap();
    let recent = harness.orchestrator.run_single("SN", false).await.unwrap();
    harness.orchestrator.jobs().update(old.job_id, |job| {
        job.started_at = Utc::now() - Duration::hours(3);
    });

    assert_eq!(harness.orchestrator.sweep_jobs(), 1);
    assert!(harness.orchestrator.job(old.job_id).is_none());
    assert!(harness.orchestrator.job(recent.job_id).is_some());
    assert_eq!(harness.orchestrator.sweep_jobs(), 0);
}

#[tokio::test]
async fn test_fetch_failure_reported_in_outcome() {
    let server = MockServer::start().await;
    serve_status(&server, "CI", 404).await;

    let harness = Harness::new(catalog_for(&server, &[("CI", "CIV")]), pipeline_config(0.0, 0.0));
    let outcome = harness.orchestrator.run_single("CI", false).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.run.error_kind, Some(ErrorKind::PermanentFetch));
    assert!(outcome.validation.is_none());
    assert_eq!(outcome.run.metrics.requests_made, 1);
    assert_eq!(harness.store.count(REPORT_COLLECTION), 0);
    assert_eq!(
        harness.notifier.kinds(),
        vec![NotificationKind::Started, NotificationKind::Failed]
    );
}

#[tokio::test]
async fn test_empty_payload_fails_job() {
    let server = MockServer::start().await;
    serve_json(&server, "CI", json!({ "tariffs": [] })).await;

    let harness = Harness::new(catalog_for(&server, &[("CI", "CIV")]), pipeline_config(0.0, 0.0));
    let outcome = harness.orchestrator.run_single("CI", false).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.run.error_kind, Some(ErrorKind::EmptyPayload));
    assert_eq!(harness.store.count(TARIFF_COLLECTION), 0);
}

#[tokio::test]
async fn test_unknown_source_is_configuration_error() {
    let server = MockServer::start().await;
    let harness = Harness::new(catalog_for(&server, &[("CI", "CIV")]), pipeline_config(0.0, 0.0));

    let err = harness.orchestrator.run_single("ZZ", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let jobs = harness.orchestrator.jobs().list();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(
        harness.notifier.kinds(),
        vec![NotificationKind::Started, NotificationKind::Failed]
    );
}

#[tokio::test]
async fn test_baseline_recorded_only_for_accepted_batches() {
    let server = MockServer::start().await;
    serve_json(&server, "CI", tariff_lines(10)).await;
    serve_json(&server, "SN", tariff_lines(10)).await;
    let catalog = catalog_for(&server, &[("CI", "CIV"), ("SN", "SEN")]);

    let baseline = Arc::new(MemoryBaseline::new());
    let accepting = Harness::new(catalog.clone(), pipeline_config(0.0, 0.0));
    let orchestrator = Arc::try_unwrap(accepting.orchestrator)
        .ok()
        .unwrap()
        .with_baseline(baseline.clone());
    orchestrator.run_single("CI", false).await.unwrap();
    assert_eq!(baseline.historical_rates("CI").len(), 10);

    let rejecting = Harness::new(catalog, pipeline_config(100.0, 100.0));
    let orchestrator = Arc::try_unwrap(rejecting.orchestrator)
        .ok()
        .unwrap()
        .with_baseline(baseline.clone());
    orchestrator.run_single("SN", false).await.unwrap();
    assert!(baseline.historical_rates("SN").is_empty());
}

#[tokio::test]
async fn test_batch_counts_unknown_source_as_exception() {
    let server = MockServer::start().await;
    let known = [("CI", "CIV"), ("SN", "SEN"), ("ML", "MLI"), ("BF", "BFA")];
    for (iso2, _) in known {
        serve_json(&server, iso2, tariff_lines(10)).await;
    }

    let harness = Harness::new(catalog_for(&server, &known), pipeline_config(0.0, 0.0));
    let ids = ["CI", "SN", "ZZ", "ML", "BF"].map(String::from).to_vec();
    let summary = harness.orchestrator.run_batch(BatchSelection::Ids(ids)).await;

    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.raised_exception, 1);
    assert_eq!(summary.entries.iter().filter(|e| e.outcome.is_some()).count(), 4);

    let unknown = &summary.entries[2];
    assert_eq!(unknown.source_id, "ZZ");
    assert_eq!(unknown.error_kind, Some(ErrorKind::Configuration));
}

#[tokio::test]
async fn test_batch_by_region_covers_catalog() {
    let server = MockServer::start().await;
    let known = [("CI", "CIV"), ("SN", "SEN")];
    serve_json(&server, "CI", tariff_lines(10)).await;
    serve_status(&server, "SN", 500).await;

    let harness = Harness::new(catalog_for(&server, &known), pipeline_config(0.0, 0.0));
    let summary = harness
        .orchestrator
        .run_batch(BatchSelection::Region("west_africa".to_string()))
        .await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.raised_exception, 0);
}

struct PanickingAdapter {
    ctx: AdapterContext,
}

#[async_trait]
impl SourceAdapter for PanickingAdapter {
    fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    fn kind(&self) -> &'static str {
        "panicking"
    }

    async fn acquire(&self) -> Result<AcquisitionResult> {
        panic!("parser blew up")
    }
}

fn panicking(ctx: AdapterContext) -> Box<dyn SourceAdapter> {
    Box::new(PanickingAdapter { ctx })
}

#[tokio::test]
async fn test_panicking_adapter_does_not_affect_siblings() {
    let server = MockServer::start().await;
    let known = [("CI", "CIV"), ("SN", "SEN")];
    serve_json(&server, "CI", tariff_lines(10)).await;

    let harness = Harness::new(catalog_for(&server, &known), pipeline_config(0.0, 0.0));
    harness.registry.register("SN", panicking);

    let ids = vec!["CI".to_string(), "SN".to_string()];
    let summary = harness.orchestrator.run_batch(BatchSelection::Ids(ids)).await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    let sn = summary.entries[1].outcome.as_ref().unwrap();
    assert_eq!(sn.status, JobStatus::Failed);
    assert_eq!(sn.run.error_kind, Some(ErrorKind::Internal));
}
