//! Batch-level data quality: coverage, completeness, freshness, outliers
//! and shape

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tariff_common::types::{fields, TariffRecord, ValidationIssue};

use super::{outlier_indices, Checks, ValidationReport, ValidatorKind};

/// A field missing in more than this share of records is reported
const FIELD_MISSING_WARN_RATIO: f64 = 0.2;
/// Coverage below this multiple of `min_coverage` is a warning
const COVERAGE_WARN_FACTOR: f64 = 1.2;
/// Age above this share of `max_age_days` is a warning
const FRESHNESS_WARN_RATIO: f64 = 0.8;
const MIN_OUTLIER_SAMPLES: usize = 10;
const FIELD_OUTLIER_WARN_RATIO: f64 = 0.05;
const BATCH_OUTLIER_ERROR_RATIO: f64 = 0.10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataQualityConfig {
    pub min_coverage: usize,
    /// Percent, 0 to 100
    pub min_completeness: f64,
    pub max_age_days: i64,
    /// In standard deviations
    pub outlier_threshold: f64,
    pub required_fields: Vec<String>,
    pub numeric_fields: Vec<String>,
}

impl Default for DataQualityConfig {
    fn default() -> Self {
        Self {
            min_coverage: 100,
            min_completeness: 80.0,
            max_age_days: 90,
            outlier_threshold: 3.0,
            required_fields: vec![
                fields::CODE.to_string(),
                fields::RATE.to_string(),
                fields::DESCRIPTION.to_string(),
            ],
            numeric_fields: vec![fields::RATE.to_string()],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataQualityValidator {
    config: DataQualityConfig,
}

impl DataQualityValidator {
    pub fn new(config: DataQualityConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, records: &[TariffRecord]) -> ValidationReport {
        self.validate_at(records, Utc::now())
    }

    /// Validate as if the current time were `now`
    pub fn validate_at(&self, records: &[TariffRecord], now: DateTime<Utc>) -> ValidationReport {
        let mut checks = Checks::new();

        checks.single(self.check_coverage(records.len()));
        if !records.is_empty() {
            checks.record(self.check_completeness(records));
        }
        checks.single(self.check_freshness(records, now));
        checks.record(self.check_outliers(records));
        checks.single(check_shape(records));
        checks.record(self.check_degenerate(records));

        checks.finish(ValidatorKind::DataQuality)
    }

    fn check_coverage(&self, count: usize) -> Option<ValidationIssue> {
        let min = self.config.min_coverage;
        if count < min {
            Some(
                ValidationIssue::error(format!("only {} records, at least {} expected", count, min))
                    .observed(count)
                    .expected(min),
            )
        } else if (count as f64) < min as f64 * COVERAGE_WARN_FACTOR {
            let message = format!("{} records is close to the minimum of {}", count, min);
            Some(ValidationIssue::warning(message).observed(count).expected(min))
        } else {
            None
        }
    }

    fn check_completeness(&self, records: &[TariffRecord]) -> Vec<ValidationIssue> {
        let required = &self.config.required_fields;
        if required.is_empty() {
            return Vec::new();
        }

        let mut missing: BTreeMap<&str, usize> = BTreeMap::new();
        let mut total_ratio = 0.0;
        for record in records {
            let mut present = 0;
            for field in required {
                if record.is_present(field) {
                    present += 1;
                } else {
                    *missing.entry(field.as_str()).or_default() += 1;
                }
            }
            total_ratio += present as f64 / required.len() as f64;
        }

        let mut issues = Vec::new();
        let completeness = 100.0 * total_ratio / records.len() as f64;
        if completeness < self.config.min_completeness {
            issues.push(
                ValidationIssue::error(format!(
                    "average completeness {:.1}% below {:.1}%",
                    completeness, self.config.min_completeness
                ))
                .observed(round1(completeness))
                .expected(self.config.min_completeness),
            );
        }

        for (field, count) in missing {
            let ratio = count as f64 / records.len() as f64;
            if ratio > FIELD_MISSING_WARN_RATIO {
                issues.push(
                    ValidationIssue::warning(format!(
                        "'{}' missing in {:.1}% of records",
                        field,
                        ratio * 100.0
                    ))
                    .field(field)
                    .observed(count),
                );
            }
        }
        issues
    }

    fn check_freshness(
        &self,
        records: &[TariffRecord],
        now: DateTime<Utc>,
    ) -> Option<ValidationIssue> {
        let newest = records.iter().filter_map(record_timestamp).max();
        let Some(newest) = newest else {
            return Some(ValidationIssue::warning("no timestamp field found, freshness unknown"));
        };

        let age_days = (now - newest).num_seconds() as f64 / 86_400.0;
        let max = self.config.max_age_days as f64;
        if age_days > max {
            let message = format!("data is {:.0} days old, limit is {}", age_days, max);
            Some(ValidationIssue::error(message).observed(round1(age_days)).expected(max))
        } else if age_days > max * FRESHNESS_WARN_RATIO {
            let message = format!("data is {:.0} days old, nearing limit of {}", age_days, max);
            Some(ValidationIssue::warning(message).observed(round1(age_days)).expected(max))
        } else {
            None
        }
    }

    fn check_outliers(&self, records: &[TariffRecord]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut flagged_records = BTreeSet::new();

        for field in &self.config.numeric_fields {
            let (indices, values) = numeric_column(records, field);
            if values.len() < MIN_OUTLIER_SAMPLES {
                continue;
            }

            let outliers = outlier_indices(&values, self.config.outlier_threshold);
            if outliers.is_empty() {
                continue;
            }
            let observed: Vec<f64> = outliers.iter().map(|&i| values[i]).collect();
            flagged_records.extend(outliers.iter().map(|&i| indices[i]));

            let ratio = outliers.len() as f64 / values.len() as f64;
            let message = format!(
                "{} outlier(s) in '{}' beyond {} standard deviations",
                outliers.len(),
                field,
                self.config.outlier_threshold
            );
            let issue = if ratio > FIELD_OUTLIER_WARN_RATIO {
                ValidationIssue::warning(message)
            } else {
                ValidationIssue::info(message)
            };
            issues.push(issue.field(field.as_str()).observed(json!(observed)));
        }

        if !records.is_empty() {
            let ratio = flagged_records.len() as f64 / records.len() as f64;
            if ratio > BATCH_OUTLIER_ERROR_RATIO {
                issues.push(
                    ValidationIssue::error(format!(
                        "{:.1}% of records carry outlier values",
                        ratio * 100.0
                    ))
                    .observed(flagged_records.len()),
                );
            }
        }
        issues
    }

    fn check_degenerate(&self, records: &[TariffRecord]) -> Vec<ValidationIssue> {
        self.config
            .numeric_fields
            .iter()
            .filter_map(|field| {
                let (_, values) = numeric_column(records, field);
                let first = *values.first()?;
                let single_value = values.len() > 1 && values.iter().all(|v| *v == first);
                single_value.then(|| {
                    ValidationIssue::warning(format!(
                        "every '{}' equals {}, data may be synthetic or stale",
                        field, first
                    ))
                    .field(field.as_str())
                    .observed(first)
                })
            })
            .collect()
    }
}

/// Record indices and values of a numeric field
fn numeric_column(records: &[TariffRecord], field: &str) -> (Vec<usize>, Vec<f64>) {
    records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.number(field).map(|v| (i, v)))
        .unzip()
}

/// All records should expose the field set of the majority
fn check_shape(records: &[TariffRecord]) -> Option<ValidationIssue> {
    let mut shapes: BTreeMap<Vec<&str>, usize> = BTreeMap::new();
    for record in records {
        *shapes.entry(record.field_names().collect()).or_default() += 1;
    }
    if shapes.len() <= 1 {
        return None;
    }

    let (common, count) = shapes.iter().max_by_key(|(_, count)| **count)?;
    let mismatched = records.len() - count;
    Some(
        ValidationIssue::warning(format!(
            "{} record(s) differ from the common field set",
            mismatched
        ))
        .observed(mismatched)
        .expected(json!(common)),
    )
}

fn record_timestamp(record: &TariffRecord) -> Option<DateTime<Utc>> {
    fields::TIMESTAMP_FIELDS
        .iter()
        .filter_map(|field| record.get(field))
        .find_map(parse_timestamp)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
