//! Tariff Pipeline Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the tariff acquisition pipeline.
//!
//! # Overview
//!
//! This crate provides common functionality used across all workspace members:
//!
//! - **Error Handling**: The pipeline error taxonomy and result type
//! - **Types**: Country metadata, per-source configuration, tariff records and
//!   validation issues
//! - **Checksums**: Fingerprints for acquired batches
//! - **Logging**: Centralized `tracing` setup
//!
//! # Example
//!
//! ```no_run
//! use tariff_common::{Result, TariffError};
//! use tariff_common::types::SourceConfig;
//!
//! fn load(source_id: &str) -> Result<SourceConfig> {
//!     let config = SourceConfig::new(source_id);
//!     config.validate()?;
//!     Ok(config)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ErrorKind, Result, TariffError};
