//! Batch validation and scoring
//!
//! Three validators look at an acquired batch from different angles:
//!
//! - [`TariffValidator`]: field-level structure of each record
//! - [`DataQualityValidator`]: batch statistics (coverage, completeness,
//!   freshness, outliers, shape)
//! - [`ConsistencyValidator`]: agreement across records, with history and
//!   with reference data
//!
//! Each produces a [`ValidationReport`] scored as `100 * passed / total`, where
//! a check fails when it raises at least one error-severity issue. The
//! orchestrator folds the reports into a single penalty-based score with
//! [`combined_score`].

pub mod consistency;
pub mod quality;
pub mod tariff;

pub use consistency::{BlocRange, ConsistencyConfig, ConsistencyContext, ConsistencyValidator};
pub use quality::{DataQualityConfig, DataQualityValidator};
pub use tariff::{TariffValidator, TariffValidatorConfig};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tariff_common::types::{Severity, TariffRecord, ValidationIssue};
use tariff_common::{Result, TariffError};

/// Score deducted per error or warning, by validator
const TARIFF_PENALTY: f64 = 3.0;
const QUALITY_PENALTY: f64 = 5.0;
const CONSISTENCY_PENALTY: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    Tariff,
    DataQuality,
    Consistency,
}

impl ValidatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatorKind::Tariff => "tariff",
            ValidatorKind::DataQuality => "data_quality",
            ValidatorKind::Consistency => "consistency",
        }
    }

    pub fn penalty(&self) -> f64 {
        match self {
            ValidatorKind::Tariff => TARIFF_PENALTY,
            ValidatorKind::DataQuality => QUALITY_PENALTY,
            ValidatorKind::Consistency => CONSISTENCY_PENALTY,
        }
    }
}

impl std::fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    #[serde(rename = "validator_name")]
    pub validator: ValidatorKind,
    /// 0 to 100
    pub score: f64,
    pub passed_checks: usize,
    pub total_checks: usize,
    pub issues: Vec<ValidationIssue>,
    pub duration_ms: u64,
}

impl ValidationReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn is_valid(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}

/// `100 * passed / total`, or 100 when nothing was checked
pub fn check_score(passed: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        100.0 * passed as f64 / total as f64
    }
}

/// Penalty score over several reports: 100 minus a fixed amount per
/// error or warning, floored at 0. Info issues are free.
pub fn combined_score(reports: &[ValidationReport]) -> f64 {
    let penalty: f64 = reports
        .iter()
        .map(|r| {
            let counted = r.issues.iter().filter(|i| i.severity != Severity::Info).count();
            counted as f64 * r.validator.penalty()
        })
        .sum();
    (100.0 - penalty).max(0.0)
}

/// Check accumulator shared by the validators
#[derive(Debug)]
pub(crate) struct Checks {
    started: Instant,
    passed: usize,
    total: usize,
    issues: Vec<ValidationIssue>,
}

impl Checks {
    pub(crate) fn new() -> Self {
        Self {
            started: Instant::now(),
            passed: 0,
            total: 0,
            issues: Vec::new(),
        }
    }

    /// Register one check made of `issues`. It passes unless one is an error.
    pub(crate) fn record(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        let before = self.issues.len();
        self.issues.extend(issues);
        self.total += 1;
        if !self.issues[before..].iter().any(ValidationIssue::is_error) {
            self.passed += 1;
        }
    }

    /// Register a check that raised at most one issue
    pub(crate) fn single(&mut self, issue: Option<ValidationIssue>) {
        self.record(issue);
    }

    pub(crate) fn finish(self, validator: ValidatorKind) -> ValidationReport {
        ValidationReport {
            validator,
            score: check_score(self.passed, self.total),
            passed_checks: self.passed,
            total_checks: self.total,
            issues: self.issues,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Mean and population standard deviation
pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.max(0.0).sqrt())
}

/// Indices of values more than `threshold` deviations from the mean of the
/// *other* values in the sample.
///
/// When the others are all equal, any value different from them counts.
pub(crate) fn outlier_indices(values: &[f64], threshold: f64) -> Vec<usize> {
    let n = values.len();
    if n < 3 {
        return Vec::new();
    }
    let sum: f64 = values.iter().sum();
    let sum_sq: f64 = values.iter().map(|v| v * v).sum();
    let others = (n - 1) as f64;

    values
        .iter()
        .enumerate()
        .filter(|(_, &x)| {
            let mean = (sum - x) / others;
            let variance = ((sum_sq - x * x) / others - mean * mean).max(0.0);
            let std = variance.sqrt();
            let distance = (x - mean).abs();
            if std <= f64::EPSILON * mean.abs().max(1.0) {
                distance > 1e-9
            } else {
                distance / std > threshold
            }
        })
        .map(|(i, _)| i)
        .collect()
}

/// Configuration of all three validators, loadable from one JSON file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSettings {
    #[serde(default)]
    pub tariff: TariffValidatorConfig,
    #[serde(default)]
    pub quality: DataQualityConfig,
    #[serde(default)]
    pub consistency: ConsistencyConfig,
}

impl ValidationSettings {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TariffError::config(format!("cannot read validation config {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Reports of one pipeline pass plus their combined score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub reports: Vec<ValidationReport>,
    pub combined_score: f64,
}

impl PipelineOutcome {
    pub fn is_valid(&self, threshold: f64) -> bool {
        self.combined_score >= threshold
    }

    pub fn issue_count(&self) -> usize {
        self.reports.iter().map(|r| r.issues.len()).sum()
    }

    pub fn report(&self, kind: ValidatorKind) -> Option<&ValidationReport> {
        self.reports.iter().find(|r| r.validator == kind)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationPipeline {
    tariff: TariffValidator,
    quality: DataQualityValidator,
    consistency: ConsistencyValidator,
}

impl ValidationPipeline {
    pub fn new(settings: ValidationSettings) -> Self {
        Self {
            tariff: TariffValidator::new(settings.tariff),
            quality: DataQualityValidator::new(settings.quality),
            consistency: ConsistencyValidator::new(settings.consistency),
        }
    }

    pub fn run(&self, records: &[TariffRecord], context: &ConsistencyContext) -> PipelineOutcome {
        let reports = vec![
            self.tariff.validate(records),
            self.quality.validate(records),
            self.consistency.validate_with(records, context),
        ];
        PipelineOutcome {
            combined_score: combined_score(&reports),
            reports,
        }
    }
}
