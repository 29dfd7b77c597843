//! Adapter for sources that publish their schedule as a CSV export

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tariff_common::types::fields;
use tariff_common::{Result, TariffError};
use tracing::{debug, info, warn};

use super::{AcquisitionResult, AdapterContext, SourceAdapter};

/// Header spellings seen in customs exports, mapped to record fields
const HEADER_ALIASES: &[(&str, &str)] = &[
    ("hs_code", fields::CODE),
    ("tariff_code", fields::CODE),
    ("code_sh", fields::CODE),
    ("nts", fields::CODE),
    ("duty", fields::RATE),
    ("duty_rate", fields::RATE),
    ("taux", fields::RATE),
    ("droit_de_douane", fields::RATE),
    ("designation", fields::DESCRIPTION),
    ("libelle", fields::DESCRIPTION),
    ("libellé", fields::DESCRIPTION),
    ("label", fields::DESCRIPTION),
    ("devise", fields::CURRENCY),
    ("unite", fields::UNIT),
];

#[derive(Debug)]
pub struct CsvAdapter {
    ctx: AdapterContext,
}

impl CsvAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    pub fn boxed(ctx: AdapterContext) -> Box<dyn SourceAdapter> {
        Box::new(Self::new(ctx))
    }
}

/// Canonical field name for a CSV header
fn field_for_header(header: &str) -> String {
    let normalized: String = header
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    HEADER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, field)| field.to_string())
        .unwrap_or(normalized)
}

/// `;` when the header line has more semicolons than commas
fn sniff_delimiter(body: &str) -> u8 {
    let header = body.lines().next().unwrap_or_default();
    if header.matches(';').count() > header.matches(',').count() {
        b';'
    } else {
        b','
    }
}

/// Parse a CSV export into JSON objects keyed by canonical field names.
///
/// Blank cells are dropped; malformed rows are skipped with a warning.
pub fn parse_csv(body: &str) -> Result<Vec<Value>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(body))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| TariffError::Parse(format!("unreadable CSV header: {}", e)))?
        .iter()
        .map(field_for_header)
        .collect();

    let mut rows = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(line = line + 2, error = %e, "Skipping malformed CSV row");
                continue;
            },
        };

        let object: Map<String, Value> = headers
            .iter()
            .zip(row.iter())
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(field, cell)| (field.clone(), Value::String(cell.to_string())))
            .collect();
        if !object.is_empty() {
            rows.push(Value::Object(object));
        }
    }
    Ok(rows)
}

#[async_trait]
impl SourceAdapter for CsvAdapter {
    fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    fn kind(&self) -> &'static str {
        "csv"
    }

    async fn acquire(&self) -> Result<AcquisitionResult> {
        let url = self.ctx.require_source_url()?.to_string();
        info!(source_id = self.ctx.source_id(), %url, "Fetching CSV export");

        let fetched = match self.ctx.http().get(self.ctx.executor(), &url).await {
            Ok(fetched) => fetched,
            Err(e) => return Ok(AcquisitionResult::failed(e.into(), self.ctx.metrics())),
        };

        let mut tariffs = parse_csv(&fetched.body)?;
        for row in tariffs.iter_mut() {
            if let Value::Object(map) = row {
                map.entry(fields::SOURCE)
                    .or_insert_with(|| Value::String(self.ctx.source_id().to_string()));
            }
        }
        debug!(rows = tariffs.len(), "CSV export parsed");

        let payload = json!({
            "source": self.ctx.source_id(),
            "url": fetched.url,
            "fetched_at": Utc::now().to_rfc3339(),
            "tariffs": tariffs,
        });
        Ok(AcquisitionResult::ok(payload, self.ctx.metrics()))
    }
}
