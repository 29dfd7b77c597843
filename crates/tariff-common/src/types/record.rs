//! Tariff line records
//!
//! A record is a flat JSON object as produced by an adapter. Field names are
//! not enforced by the type; validators check them against configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known field names
pub mod fields {
    pub const CODE: &str = "code";
    pub const RATE: &str = "rate";
    pub const DESCRIPTION: &str = "description";
    pub const CURRENCY: &str = "currency";
    pub const UNIT: &str = "unit";
    pub const SOURCE: &str = "source";

    /// Fields that may carry the publication or scrape time of a record
    pub const TIMESTAMP_FIELDS: &[&str] = &[
        "last_updated",
        "updated_at",
        "scraped_at",
        "fetched_at",
        "timestamp",
        "date",
    ];
}

/// One tariff line
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TariffRecord {
    fields: Map<String, Value>,
}

impl TariffRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON object; anything else is rejected
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Present and not null, blank, or an empty container
    pub fn is_present(&self, field: &str) -> bool {
        match self.fields.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(_) => true,
        }
    }

    /// String or number rendered as text
    pub fn text(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Numeric value, accepting `"12.5%"` style strings
    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(parse_rate)
    }

    /// Code with spaces and dots removed (`"0101.21"` -> `"010121"`)
    pub fn normalized_code(&self) -> Option<String> {
        let raw = self.text(fields::CODE)?;
        let normalized: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '.')
            .collect();
        (!normalized.is_empty()).then_some(normalized)
    }

    /// First two digits of the normalized code
    pub fn chapter(&self) -> Option<u32> {
        let code = self.normalized_code()?;
        code.get(..2)?.parse().ok()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Parse a rate from a JSON number or a string such as `"12.5"`, `"12,5 %"`
pub fn parse_rate(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            let trimmed = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
            trimmed.replace(',', ".").parse::<f64>().ok()
        },
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalized_code_and_chapter() {
        let record = TariffRecord::new().with(fields::CODE, "0101.21");
        assert_eq!(record.normalized_code().as_deref(), Some("010121"));
        assert_eq!(record.chapter(), Some(1));

        let spaced = TariffRecord::new().with(fields::CODE, "84 71.30 00");
        assert_eq!(spaced.normalized_code().as_deref(), Some("84713000"));
        assert_eq!(spaced.chapter(), Some(84));
    }

    #[test]
    fn test_numeric_code_is_text() {
        let record = TariffRecord::new().with(fields::CODE, json!(8471));
        assert_eq!(record.normalized_code().as_deref(), Some("8471"));
    }

    #[test]
    fn test_parse_rate_variants() {
        assert_eq!(parse_rate(&json!(12.5)), Some(12.5));
        assert_eq!(parse_rate(&json!("60%")), Some(60.0));
        assert_eq!(parse_rate(&json!(" 12,5 % ")), Some(12.5));
        assert_eq!(parse_rate(&json!("free")), None);
        assert_eq!(parse_rate(&json!(null)), None);
    }

    #[test]
    fn test_presence() {
        let record = TariffRecord::from_value(json!({
            "code": "0101",
            "description": "   ",
            "unit": null,
            "tags": [],
        }))
        .unwrap();
        assert!(record.is_present("code"));
        assert!(!record.is_present("description"));
        assert!(!record.is_present("unit"));
        assert!(!record.is_present("tags"));
        assert!(!record.is_present("rate"));
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(TariffRecord::from_value(json!([1, 2])).is_none());
    }
}
