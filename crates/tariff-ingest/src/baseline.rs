//! Rate baselines for consistency checks
//!
//! After a successful job the orchestrator records the batch's rates; the
//! next run of the same source is compared against them.

use std::collections::HashMap;
use std::sync::RwLock;
use tariff_common::types::{fields, TariffRecord};
use tracing::debug;

pub type RateTable = HashMap<String, f64>;

pub trait BaselineProvider: Send + Sync {
    /// Rates from the last accepted batch, by normalized code
    fn historical_rates(&self, source_id: &str) -> RateTable;

    /// Trusted rates, by normalized code
    fn reference_rates(&self, source_id: &str) -> RateTable;

    /// Remember an accepted batch as the new history
    fn record_batch(&self, source_id: &str, records: &[TariffRecord]);
}

#[derive(Debug, Default)]
pub struct MemoryBaseline {
    history: RwLock<HashMap<String, RateTable>>,
    reference: RwLock<HashMap<String, RateTable>>,
}

impl MemoryBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(self, source_id: &str, table: RateTable) -> Self {
        self.reference
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(source_id.to_ascii_uppercase(), table);
        self
    }
}

/// Rate per normalized code; later duplicates win
pub fn rate_table(records: &[TariffRecord]) -> RateTable {
    records
        .iter()
        .filter_map(|r| Some((r.normalized_code()?, r.number(fields::RATE)?)))
        .collect()
}

impl BaselineProvider for MemoryBaseline {
    fn historical_rates(&self, source_id: &str) -> RateTable {
        self.history
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&source_id.to_ascii_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    fn reference_rates(&self, source_id: &str) -> RateTable {
        self.reference
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&source_id.to_ascii_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    fn record_batch(&self, source_id: &str, records: &[TariffRecord]) {
        let table = rate_table(records);
        if table.is_empty() {
            return;
        }
        debug!(source_id, codes = table.len(), "Baseline updated");
        self.history
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(source_id.to_ascii_uppercase(), table);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_history_replaced_per_batch() {
        let baseline = MemoryBaseline::new();
        assert!(baseline.historical_rates("CI").is_empty());

        let records = vec![
            TariffRecord::new().with(fields::CODE, "0101.21").with(fields::RATE, "5%"),
            TariffRecord::new().with(fields::CODE, "0102").with(fields::RATE, 10),
            TariffRecord::new().with(fields::DESCRIPTION, "no code"),
        ];
        baseline.record_batch("ci", &records);

        let history = baseline.historical_rates("CI");
        assert_eq!(history.len(), 2);
        assert_eq!(history.get("010121"), Some(&5.0));

        // Empty batches keep the previous history
        baseline.record_batch("CI", &[]);
        assert_eq!(baseline.historical_rates("CI").len(), 2);
    }

    #[test]
    fn test_reference_tables() {
        let baseline =
            MemoryBaseline::new().with_reference("sn", HashMap::from([("0101".to_string(), 5.0)]));
        assert_eq!(baseline.reference_rates("SN").get("0101"), Some(&5.0));
        assert!(baseline.reference_rates("CI").is_empty());
    }
}
