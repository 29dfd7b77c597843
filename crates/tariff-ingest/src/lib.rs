//! Tariff Ingest Library
//!
//! Per-country acquisition and validation of customs tariff schedules.
//!
//! # Pipeline
//!
//! - **Acquisition**: a [`adapter::SourceAdapter`] per country fetches its
//!   schedule through a rate-limited, retrying HTTP client
//! - **Registry**: [`registry::AdapterRegistry`] maps catalog ids to adapters,
//!   falling back to the generic JSON adapter
//! - **Validation**: tariff, data-quality and consistency validators scored
//!   into one combined figure
//! - **Orchestration**: [`orchestrator::JobOrchestrator`] tracks jobs, persists
//!   reports, notifies and runs bounded concurrent batches
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tariff_ingest::catalog::StaticCatalog;
//! use tariff_ingest::config::PipelineConfig;
//! use tariff_ingest::orchestrator::JobOrchestrator;
//! use tariff_ingest::registry::AdapterRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let catalog = Arc::new(StaticCatalog::from_json_file("./countries.json")?);
//!     let defaults = config.source_defaults.clone();
//!     let registry = Arc::new(AdapterRegistry::with_builtins(catalog, defaults));
//!     let orchestrator = JobOrchestrator::new(registry, config);
//!
//!     let outcome = orchestrator.run_single("CI", false).await?;
//!     println!("{:?} {:?}", outcome.status, outcome.combined_score());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod adapter;
pub mod baseline;
pub mod catalog;
pub mod config;
pub mod http;
pub mod jobs;
pub mod notify;
pub mod orchestrator;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod storage;
pub mod validation;

pub use adapter::{
    run_adapter, AcquisitionResult, AdapterContext, RunOptions, RunResult, SourceAdapter,
};
pub use config::PipelineConfig;
pub use orchestrator::{
    BatchSelection, BatchSummary, JobOrchestrator, JobOutcome, ValidationVerdict,
};
pub use registry::AdapterRegistry;
pub use validation::{PipelineOutcome, ValidationPipeline, ValidationReport};
