//! Shared fixtures for the ingest integration tests
//!
//! Sources point at a wiremock server; fetch settings are shrunk so retries
//! finish in milliseconds.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use serde_json::{json, Value};
use std::sync::Arc;
use tariff_common::types::{CountryConfig, SourceConfig};
use tariff_ingest::catalog::StaticCatalog;
use tariff_ingest::config::PipelineConfig;
use tariff_ingest::notify::{MemoryNotifier, NotificationHub};
use tariff_ingest::orchestrator::JobOrchestrator;
use tariff_ingest::registry::AdapterRegistry;
use tariff_ingest::storage::MemoryStore;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Fetch settings with millisecond backoff and no rate limiting
pub fn fast_source_config() -> SourceConfig {
    SourceConfig {
        max_retries: 2,
        retry_base_delay_seconds: 0.001,
        request_timeout_seconds: 5.0,
        rate_limit_calls: 100,
        rate_limit_period_seconds: 0.0,
        ..SourceConfig::new("default")
    }
}

pub fn country(iso2: &str, iso3: &str, source_url: Option<Url>) -> CountryConfig {
    CountryConfig {
        iso2: iso2.to_string(),
        iso3: iso3.to_string(),
        name_en: format!("Country {}", iso2),
        name_fr: format!("Pays {}", iso2),
        region: "west_africa".to_string(),
        blocs: vec!["ECOWAS".to_string()],
        tax_rate: 18.0,
        source_url,
        priority_tier: 1,
        languages: vec!["fr".to_string()],
    }
}

/// Catalog whose sources are served from `<server>/<iso2>`
pub fn catalog_for(server: &MockServer, ids: &[(&str, &str)]) -> StaticCatalog {
    StaticCatalog::new(ids.iter().map(|(iso2, iso3)| {
        let url = Url::parse(&format!("{}/{}", server.uri(), iso2)).unwrap();
        country(iso2, iso3, Some(url))
    }))
}

/// `n` well-formed tariff lines
pub fn tariff_lines(n: usize) -> Value {
    let lines: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "code": format!("{:04}.{:02}", 101 + i, i % 90 + 10),
                "rate": 5 + (i % 4) * 5,
                "description": format!("Tariff line number {}", i),
                "currency": "XOF",
                "unit": "kg",
            })
        })
        .collect();
    json!({ "tariffs": lines })
}

pub async fn serve_json(server: &MockServer, iso2: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/{}", iso2)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn serve_status(server: &MockServer, iso2: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/{}", iso2)))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

pub fn pipeline_config(min_score: f64, alert_threshold: f64) -> PipelineConfig {
    PipelineConfig {
        min_validation_score: min_score,
        validation_alert_threshold: alert_threshold,
        source_defaults: fast_source_config(),
        ..PipelineConfig::default()
    }
}

/// Orchestrator wired to in-memory notification and storage
pub struct Harness {
    pub orchestrator: Arc<JobOrchestrator>,
    pub notifier: Arc<MemoryNotifier>,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<AdapterRegistry>,
}

impl Harness {
    pub fn new(catalog: StaticCatalog, config: PipelineConfig) -> Self {
        let defaults = config.source_defaults.clone();
        let registry = Arc::new(AdapterRegistry::new(Arc::new(catalog), defaults));
        Self::with_registry(registry, config)
    }

    pub fn with_registry(registry: Arc<AdapterRegistry>, config: PipelineConfig) -> Self {
        let notifier = Arc::new(MemoryNotifier::new());
        let store = Arc::new(MemoryStore::new());
        let hub = NotificationHub::new(config.notify_timeout()).with_channel(notifier.clone());
        let orchestrator = JobOrchestrator::new(registry.clone(), config)
            .with_notifier(hub)
            .with_store(store.clone());
        Self {
            orchestrator: Arc::new(orchestrator),
            notifier,
            store,
            registry,
        }
    }
}
