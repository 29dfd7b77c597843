//! Field-level structure of tariff lines

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tariff_common::types::{fields, parse_rate, TariffRecord, ValidationIssue};

use super::{Checks, ValidationReport, ValidatorKind};

/// Duplicate codes spelled out in the duplicate warning
const LISTED_DUPLICATES: usize = 10;
const MAX_UNIT_LENGTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TariffValidatorConfig {
    pub required_fields: Vec<String>,
    /// Reject code lengths outside `valid_code_lengths` (warn otherwise)
    pub strict_code_length: bool,
    pub valid_code_lengths: Vec<usize>,
    pub max_rate: f64,
    /// Rates above this are reported as suspicious
    pub suspicious_rate_threshold: f64,
    pub allow_zero_rate: bool,
    pub min_description_length: usize,
    pub max_description_length: usize,
}

impl Default for TariffValidatorConfig {
    fn default() -> Self {
        Self {
            required_fields: vec![
                fields::CODE.to_string(),
                fields::RATE.to_string(),
                fields::DESCRIPTION.to_string(),
            ],
            strict_code_length: true,
            valid_code_lengths: vec![2, 4, 6, 8, 10, 12],
            max_rate: 100.0,
            suspicious_rate_threshold: 50.0,
            allow_zero_rate: true,
            min_description_length: 3,
            max_description_length: 1000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TariffValidator {
    config: TariffValidatorConfig,
}

impl TariffValidator {
    pub fn new(config: TariffValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TariffValidatorConfig {
        &self.config
    }

    pub fn validate(&self, records: &[TariffRecord]) -> ValidationReport {
        let mut checks = Checks::new();

        for (index, record) in records.iter().enumerate() {
            checks.record(self.check_required(index, record));

            if record.is_present(fields::CODE) {
                checks.record(self.check_code(index, record));
            }
            if record.is_present(fields::RATE) {
                if let Some(raw) = record.get(fields::RATE) {
                    checks.record(self.check_rate(index, raw));
                }
            }
            let description = record.text(fields::DESCRIPTION);
            if let Some(description) = description.filter(|d| !d.trim().is_empty()) {
                checks.single(self.check_description(index, &description));
            }
            if let Some(currency) = record.text(fields::CURRENCY) {
                checks.single(check_currency(index, &currency));
            }
            if let Some(unit) = record.text(fields::UNIT) {
                checks.single(check_unit(index, &unit));
            }
        }

        checks.single(duplicate_codes(records));
        checks.finish(ValidatorKind::Tariff)
    }

    fn check_required(&self, index: usize, record: &TariffRecord) -> Vec<ValidationIssue> {
        self.config
            .required_fields
            .iter()
            .filter(|field| !record.is_present(field))
            .map(|field| {
                let message = format!("record {}: missing required field '{}'", index, field);
                ValidationIssue::error(message).field(field.as_str())
            })
            .collect()
    }

    fn check_code(&self, index: usize, record: &TariffRecord) -> Vec<ValidationIssue> {
        let Some(code) = record.normalized_code() else {
            return vec![ValidationIssue::error(format!("record {}: code is not text", index))
                .field(fields::CODE)];
        };

        if !code.chars().all(|c| c.is_ascii_digit()) {
            let message = format!("record {}: code '{}' is not numeric", index, code);
            return vec![ValidationIssue::error(message).field(fields::CODE).observed(code)];
        }

        let mut issues = Vec::new();
        if !self.config.valid_code_lengths.contains(&code.len()) {
            let message = format!("record {}: code '{}' has {} digits", index, code, code.len());
            let issue = if self.config.strict_code_length {
                ValidationIssue::error(message)
            } else {
                ValidationIssue::warning(message)
            };
            issues.push(
                issue
                    .field(fields::CODE)
                    .observed(code.len())
                    .expected(json!(self.config.valid_code_lengths)),
            );
        }

        match record.chapter() {
            Some(chapter) if (1..=99).contains(&chapter) => {},
            chapter => {
                let message = format!("record {}: chapter of '{}' is outside 01-99", index, code);
                issues.push(
                    ValidationIssue::error(message)
                        .field(fields::CODE)
                        .observed(json!(chapter)),
                );
            },
        }
        issues
    }

    fn check_rate(&self, index: usize, raw: &serde_json::Value) -> Vec<ValidationIssue> {
        let Some(rate) = parse_rate(raw) else {
            return vec![ValidationIssue::error(format!("record {}: rate is not a number", index))
                .field(fields::RATE)
                .observed(raw.clone())];
        };

        if rate < 0.0 || rate > self.config.max_rate {
            return vec![ValidationIssue::error(format!(
                "record {}: rate {} outside [0, {}]",
                index, rate, self.config.max_rate
            ))
            .field(fields::RATE)
            .observed(rate)
            .expected(json!([0.0, self.config.max_rate]))];
        }

        if rate == 0.0 && !self.config.allow_zero_rate {
            return vec![ValidationIssue::error(format!("record {}: zero rate not allowed", index))
                .field(fields::RATE)
                .observed(rate)];
        }

        if rate > self.config.suspicious_rate_threshold {
            return vec![ValidationIssue::warning(format!(
                "record {}: suspiciously high rate {}",
                index, rate
            ))
            .field(fields::RATE)
            .observed(rate)
            .expected(json!({ "max": self.config.suspicious_rate_threshold }))];
        }
        Vec::new()
    }

    fn check_description(&self, index: usize, description: &str) -> Option<ValidationIssue> {
        let length = description.trim().chars().count();
        let (min, max) = (
            self.config.min_description_length,
            self.config.max_description_length,
        );
        (length < min || length > max).then(|| {
            ValidationIssue::error(format!(
                "record {}: description length {} outside [{}, {}]",
                index, length, min, max
            ))
            .field(fields::DESCRIPTION)
            .observed(length)
        })
    }
}

fn check_currency(index: usize, currency: &str) -> Option<ValidationIssue> {
    let valid = currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase());
    (!valid).then(|| {
        let message = format!("record {}: '{}' is not an ISO currency code", index, currency);
        ValidationIssue::warning(message)
            .field(fields::CURRENCY)
            .observed(currency)
    })
}

fn check_unit(index: usize, unit: &str) -> Option<ValidationIssue> {
    let unit = unit.trim();
    let sane = !unit.is_empty()
        && unit.chars().count() <= MAX_UNIT_LENGTH
        && unit.chars().any(char::is_alphabetic);
    (!sane).then(|| {
        ValidationIssue::warning(format!("record {}: unit '{}' looks wrong", index, unit))
            .field(fields::UNIT)
            .observed(unit)
    })
}

/// One warning naming every normalized code seen more than once
fn duplicate_codes(records: &[TariffRecord]) -> Option<ValidationIssue> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    for code in records.iter().filter_map(TariffRecord::normalized_code) {
        *seen.entry(code).or_default() += 1;
    }
    let duplicates: Vec<String> = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(code, _)| code)
        .collect();
    if duplicates.is_empty() {
        return None;
    }

    let listed: Vec<&str> = duplicates.iter().take(LISTED_DUPLICATES).map(String::as_str).collect();
    let more = duplicates.len().saturating_sub(LISTED_DUPLICATES);
    let suffix = if more > 0 { format!(" and {} more", more) } else { String::new() };
    Some(
        ValidationIssue::warning(format!(
            "{} duplicate codes: {}{}",
            duplicates.len(),
            listed.join(", "),
            suffix
        ))
        .field(fields::CODE)
        .observed(json!(duplicates)),
    )
}
