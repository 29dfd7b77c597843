//! Reference catalog of country sources
//!
//! The pipeline only reads the catalog. Identifiers are ISO alpha-2 codes;
//! lookups accept alpha-2 or alpha-3 in any case.

use std::collections::BTreeMap;
use std::path::Path;
use tariff_common::types::CountryConfig;
use tariff_common::{Result, TariffError};

pub trait ReferenceCatalog: Send + Sync {
    fn lookup(&self, id: &str) -> Option<CountryConfig>;

    /// Source ids in a region
    fn list_by_region(&self, region: &str) -> Vec<String>;

    /// Source ids belonging to an economic bloc
    fn list_by_bloc(&self, bloc: &str) -> Vec<String>;

    /// Source ids with the given priority tier
    fn list_by_priority(&self, tier: u8) -> Vec<String>;

    fn list_all(&self) -> Vec<String>;

    fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }
}

/// In-memory catalog, keyed by upper-case alpha-2 code
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    countries: BTreeMap<String, CountryConfig>,
}

impl StaticCatalog {
    pub fn new(countries: impl IntoIterator<Item = CountryConfig>) -> Self {
        let countries = countries
            .into_iter()
            .map(|mut country| {
                country.iso2 = country.iso2.to_ascii_uppercase();
                country.iso3 = country.iso3.to_ascii_uppercase();
                (country.iso2.clone(), country)
            })
            .collect();
        Self { countries }
    }

    /// Load a JSON array of country entries
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TariffError::config(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        let countries: Vec<CountryConfig> = serde_json::from_str(&content)?;
        Ok(Self::new(countries))
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    fn ids_where(&self, predicate: impl Fn(&CountryConfig) -> bool) -> Vec<String> {
        self.countries
            .values()
            .filter(|c| predicate(c))
            .map(|c| c.iso2.clone())
            .collect()
    }
}

impl ReferenceCatalog for StaticCatalog {
    fn lookup(&self, id: &str) -> Option<CountryConfig> {
        let key = id.trim().to_ascii_uppercase();
        match key.len() {
            3 => self.countries.values().find(|c| c.iso3 == key).cloned(),
            _ => self.countries.get(&key).cloned(),
        }
    }

    fn list_by_region(&self, region: &str) -> Vec<String> {
        self.ids_where(|c| c.region.eq_ignore_ascii_case(region))
    }

    fn list_by_bloc(&self, bloc: &str) -> Vec<String> {
        self.ids_where(|c| c.in_bloc(bloc))
    }

    fn list_by_priority(&self, tier: u8) -> Vec<String> {
        self.ids_where(|c| c.priority_tier == tier)
    }

    fn list_all(&self) -> Vec<String> {
        self.countries.keys().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn country(iso2: &str, region: &str, blocs: &[&str], tier: u8) -> CountryConfig {
        CountryConfig {
            iso2: iso2.to_string(),
            iso3: format!("{}X", iso2),
            name_en: format!("Country {}", iso2),
            name_fr: format!("Pays {}", iso2),
            region: region.to_string(),
            blocs: blocs.iter().map(|b| b.to_string()).collect(),
            tax_rate: 18.0,
            source_url: None,
            priority_tier: tier,
            languages: vec!["fr".to_string()],
        }
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(vec![
            country("ci", "west_africa", &["ECOWAS", "WAEMU"], 1),
            country("SN", "west_africa", &["ECOWAS", "WAEMU"], 1),
            country("KE", "east_africa", &["EAC"], 2),
        ])
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let catalog = catalog();
        assert_eq!(catalog.lookup("ci").map(|c| c.iso2), Some("CI".to_string()));
        assert_eq!(catalog.lookup("CIX").map(|c| c.iso2), Some("CI".to_string()));
        assert!(catalog.lookup("ZZ").is_none());
        assert!(!catalog.contains(""));
    }

    #[test]
    fn test_listings() {
        let catalog = catalog();
        assert_eq!(catalog.list_by_region("WEST_AFRICA"), vec!["CI", "SN"]);
        assert_eq!(catalog.list_by_bloc("eac"), vec!["KE"]);
        assert_eq!(catalog.list_by_priority(1), vec!["CI", "SN"]);
        assert_eq!(catalog.list_all(), vec!["CI", "KE", "SN"]);
    }

    #[test]
    fn test_load_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let countries = vec![country("GH", "west_africa", &["ECOWAS"], 2)];
        let json = serde_json::to_string(&countries).unwrap();
        std::fs::write(&path, json).unwrap();

        let catalog = StaticCatalog::from_json_file(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.list_by_bloc("ECOWAS"), vec!["GH"]);

        let missing = StaticCatalog::from_json_file(dir.path().join("nope.json"));
        assert!(missing.is_err());
    }
}
