//! Cross-record consistency, and agreement with history and reference data

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tariff_common::types::{fields, TariffRecord, ValidationIssue};

use super::{mean_std, outlier_indices, Checks, ValidationReport, ValidatorKind};

/// Share of mismatching reference codes above which the check fails
const REFERENCE_ERROR_RATIO: f64 = 0.05;
/// Share of out-of-range records above which the range check fails
const RANGE_ERROR_RATIO: f64 = 0.10;
const MIN_CHAPTER_SAMPLES: usize = 5;
/// Per-record findings reported individually before summarising
const MAX_REPORTED: usize = 10;

/// Expected rate range for a bloc or region, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlocRange {
    pub min: f64,
    pub max: f64,
}

impl BlocRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, rate: f64) -> bool {
        rate >= self.min && rate <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    pub max_rate_change_percent: f64,
    pub max_absolute_rate_change: f64,
    /// Allowed difference from a reference rate
    pub reference_tolerance: f64,
    /// Keyed by upper-case bloc code or region name
    pub bloc_ranges: BTreeMap<String, BlocRange>,
    /// In standard deviations
    pub chapter_outlier_threshold: f64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        let bloc_ranges = [
            ("ECOWAS", BlocRange::new(0.0, 35.0)),
            ("WAEMU", BlocRange::new(0.0, 35.0)),
            ("CEMAC", BlocRange::new(0.0, 30.0)),
            ("EAC", BlocRange::new(0.0, 35.0)),
            ("SACU", BlocRange::new(0.0, 45.0)),
        ]
        .into_iter()
        .map(|(bloc, range)| (bloc.to_string(), range))
        .collect();

        Self {
            max_rate_change_percent: 50.0,
            max_absolute_rate_change: 20.0,
            reference_tolerance: 0.1,
            bloc_ranges,
            chapter_outlier_threshold: 3.0,
        }
    }
}

/// Data the batch is compared against. Every part is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyContext {
    /// Previous rate per normalized code
    #[serde(default)]
    pub historical_rates: HashMap<String, f64>,
    /// Trusted rate per normalized code
    #[serde(default)]
    pub reference_rates: HashMap<String, f64>,
    #[serde(default)]
    pub blocs: Vec<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl ConsistencyContext {
    pub fn with_blocs(mut self, blocs: &[String], region: &str) -> Self {
        self.blocs = blocs.to_vec();
        self.region = Some(region.to_string());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsistencyValidator {
    config: ConsistencyConfig,
}

/// Normalized code and parsed rate of each record that has both
fn coded_rates(records: &[TariffRecord]) -> Vec<(String, f64)> {
    records
        .iter()
        .filter_map(|r| Some((r.normalized_code()?, r.number(fields::RATE)?)))
        .collect()
}

impl ConsistencyValidator {
    pub fn new(config: ConsistencyConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, records: &[TariffRecord]) -> ValidationReport {
        self.validate_with(records, &ConsistencyContext::default())
    }

    pub fn validate_with(
        &self,
        records: &[TariffRecord],
        context: &ConsistencyContext,
    ) -> ValidationReport {
        let mut checks = Checks::new();
        let rates = coded_rates(records);

        checks.single(check_descriptions(records));
        checks.single(check_single_source(records));
        if !context.historical_rates.is_empty() {
            checks.record(self.check_history(&rates, &context.historical_rates));
        }
        if !context.reference_rates.is_empty() {
            checks.record(self.check_reference(&rates, &context.reference_rates));
        }
        if let Some((name, range)) = self.range_for(context) {
            checks.single(check_range(&rates, name, range));
        }
        checks.record(self.check_chapters(records));
        checks.record(check_pairing(records));

        checks.finish(ValidatorKind::Consistency)
    }

    /// First configured range among the context's blocs, then its region
    fn range_for<'a>(&'a self, context: &'a ConsistencyContext) -> Option<(&'a str, BlocRange)> {
        context
            .blocs
            .iter()
            .chain(context.region.iter())
            .find_map(|key| {
                self.config
                    .bloc_ranges
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
                    .map(|(name, range)| (name.as_str(), *range))
            })
    }

    fn check_history(
        &self,
        rates: &[(String, f64)],
        history: &HashMap<String, f64>,
    ) -> Vec<ValidationIssue> {
        let max_pct = self.config.max_rate_change_percent;
        let max_abs = self.config.max_absolute_rate_change;

        let changed: Vec<(&str, f64, f64)> = rates
            .iter()
            .filter_map(|(code, current)| {
                let previous = *history.get(code)?;
                let absolute = (current - previous).abs();
                let relative = if previous == 0.0 {
                    if absolute > 0.0 { f64::INFINITY } else { 0.0 }
                } else {
                    100.0 * absolute / previous.abs()
                };
                let flagged = relative > max_pct || absolute > max_abs;
                flagged.then_some((code.as_str(), previous, *current))
            })
            .collect();

        let mut issues: Vec<ValidationIssue> = changed
            .iter()
            .take(MAX_REPORTED)
            .map(|(code, previous, current)| {
                ValidationIssue::warning(format!(
                    "rate for {} changed from {} to {}",
                    code, previous, current
                ))
                .field(fields::RATE)
                .observed(*current)
                .expected(*previous)
            })
            .collect();
        if changed.len() > MAX_REPORTED {
            issues.push(ValidationIssue::info(format!(
                "{} further rate changes not listed",
                changed.len() - MAX_REPORTED
            )));
        }
        issues
    }

    fn check_reference(
        &self,
        rates: &[(String, f64)],
        reference: &HashMap<String, f64>,
    ) -> Vec<ValidationIssue> {
        let matched: Vec<(&str, f64, f64)> = rates
            .iter()
            .filter_map(|(code, rate)| reference.get(code).map(|r| (code.as_str(), *rate, *r)))
            .collect();
        if matched.is_empty() {
            return vec![ValidationIssue::info("no code matched the reference table")];
        }

        let mismatched: Vec<_> = matched
            .iter()
            .filter(|(_, rate, expected)| (rate - expected).abs() > self.config.reference_tolerance)
            .collect();
        let ratio = mismatched.len() as f64 / matched.len() as f64;

        if ratio > REFERENCE_ERROR_RATIO {
            return vec![ValidationIssue::error(format!(
                "{} of {} codes differ from the reference table",
                mismatched.len(),
                matched.len()
            ))
            .field(fields::RATE)
            .observed(mismatched.len())
            .expected(json!({ "max_ratio": REFERENCE_ERROR_RATIO }))];
        }

        mismatched
            .iter()
            .map(|(code, rate, expected)| {
                ValidationIssue::warning(format!("rate for {} differs from reference", code))
                    .field(fields::RATE)
                    .observed(*rate)
                    .expected(*expected)
            })
            .collect()
    }

    fn check_chapters(&self, records: &[TariffRecord]) -> Vec<ValidationIssue> {
        let mut chapters: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for record in records {
            if let (Some(chapter), Some(rate)) = (record.chapter(), record.number(fields::RATE)) {
                chapters.entry(chapter).or_default().push(rate);
            }
        }

        chapters
            .iter()
            .filter(|(_, values)| values.len() >= MIN_CHAPTER_SAMPLES)
            .filter_map(|(chapter, values)| {
                let outliers = outlier_indices(values, self.config.chapter_outlier_threshold);
                if outliers.is_empty() {
                    return None;
                }
                let (mean, _) = mean_std(values);
                let observed: Vec<f64> = outliers.iter().map(|&i| values[i]).collect();
                Some(
                    ValidationIssue::warning(format!(
                        "chapter {:02}: {} rate(s) far from the chapter mean",
                        chapter,
                        outliers.len()
                    ))
                    .field(fields::RATE)
                    .observed(json!(observed))
                    .expected(json!({ "chapter_mean": (mean * 100.0).round() / 100.0 })),
                )
            })
            .collect()
    }
}

/// One warning naming codes that carry more than one description
fn check_descriptions(records: &[TariffRecord]) -> Option<ValidationIssue> {
    let mut by_code: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for record in records {
        let pair = (record.normalized_code(), record.text(fields::DESCRIPTION));
        if let (Some(code), Some(description)) = pair {
            by_code
                .entry(code)
                .or_default()
                .insert(description.trim().to_lowercase());
        }
    }

    let conflicting: Vec<&String> = by_code
        .iter()
        .filter(|(_, descriptions)| descriptions.len() > 1)
        .map(|(code, _)| code)
        .collect();
    (!conflicting.is_empty()).then(|| {
        ValidationIssue::warning(format!(
            "{} code(s) map to more than one description",
            conflicting.len()
        ))
        .field(fields::DESCRIPTION)
        .observed(json!(conflicting.iter().take(MAX_REPORTED).collect::<Vec<_>>()))
    })
}

fn check_single_source(records: &[TariffRecord]) -> Option<ValidationIssue> {
    let sources: BTreeSet<String> = records.iter().filter_map(|r| r.text(fields::SOURCE)).collect();
    (sources.len() > 1).then(|| {
        ValidationIssue::warning(format!("batch mixes {} sources", sources.len()))
            .field(fields::SOURCE)
            .observed(json!(sources))
    })
}

fn check_range(rates: &[(String, f64)], name: &str, range: BlocRange) -> Option<ValidationIssue> {
    if rates.is_empty() {
        return None;
    }
    let outside: Vec<f64> = rates
        .iter()
        .map(|(_, rate)| *rate)
        .filter(|rate| !range.contains(*rate))
        .collect();
    if outside.is_empty() {
        return None;
    }

    let ratio = outside.len() as f64 / rates.len() as f64;
    let message = format!(
        "{} rate(s) outside the {} range [{}, {}]",
        outside.len(),
        name,
        range.min,
        range.max
    );
    let issue = if ratio > RANGE_ERROR_RATIO {
        ValidationIssue::error(message)
    } else {
        ValidationIssue::warning(message)
    };
    Some(
        issue
            .field(fields::RATE)
            .observed(outside.len())
            .expected(json!([range.min, range.max])),
    )
}

/// A code without a description, or a description without a code
fn check_pairing(records: &[TariffRecord]) -> Vec<ValidationIssue> {
    let unpaired: Vec<(usize, &str)> = records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| {
            match (r.is_present(fields::CODE), r.is_present(fields::DESCRIPTION)) {
                (true, false) => Some((i, fields::DESCRIPTION)),
                (false, true) => Some((i, fields::CODE)),
                _ => None,
            }
        })
        .collect();

    unpaired
        .iter()
        .take(MAX_REPORTED)
        .map(|(i, missing)| {
            ValidationIssue::warning(format!("record {}: {} is missing its pair", i, missing))
                .field(*missing)
        })
        .collect()
}
