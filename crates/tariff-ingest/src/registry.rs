//! Source id to adapter resolution
//!
//! The registry is populated once at startup from [`builtin_registrations`]
//! and then shared (behind an `Arc`) by the orchestrator. Sources without a
//! specific registration fall back to [`GenericAdapter`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tariff_common::types::SourceConfig;
use tariff_common::{Result, TariffError};
use tracing::{debug, warn};

use crate::adapter::{AdapterContext, CsvAdapter, GenericAdapter, SourceAdapter};
use crate::catalog::ReferenceCatalog;

/// Builds an adapter from a resolved context
pub type AdapterFactory = fn(AdapterContext) -> Box<dyn SourceAdapter>;

/// Sources with a dedicated adapter. Everything else uses the generic one.
const BUILTIN_REGISTRATIONS: &[(&str, AdapterFactory)] = &[
    ("KE", CsvAdapter::boxed),
    ("TZ", CsvAdapter::boxed),
    ("UG", CsvAdapter::boxed),
    ("RW", CsvAdapter::boxed),
    ("GH", CsvAdapter::boxed),
];

pub fn builtin_registrations() -> &'static [(&'static str, AdapterFactory)] {
    BUILTIN_REGISTRATIONS
}

pub struct AdapterRegistry {
    catalog: Arc<dyn ReferenceCatalog>,
    factories: RwLock<HashMap<String, AdapterFactory>>,
    base_config: SourceConfig,
    overrides: RwLock<HashMap<String, SourceConfig>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("registered", &self.registered())
            .field("base_config", &self.base_config)
            .finish()
    }
}

impl AdapterRegistry {
    /// Empty registry; every source resolves to the generic adapter
    pub fn new(catalog: Arc<dyn ReferenceCatalog>, base_config: SourceConfig) -> Self {
        Self {
            catalog,
            factories: RwLock::new(HashMap::new()),
            base_config,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Registry populated from the built-in table
    pub fn with_builtins(catalog: Arc<dyn ReferenceCatalog>, base_config: SourceConfig) -> Self {
        let registry = Self::new(catalog, base_config);
        for (source_id, factory) in builtin_registrations() {
            registry.register(source_id, *factory);
        }
        registry
    }

    pub fn catalog(&self) -> &Arc<dyn ReferenceCatalog> {
        &self.catalog
    }

    /// Associate `source_id` with a specific adapter.
    ///
    /// Ids unknown to the catalog are still recorded, with a warning.
    pub fn register(&self, source_id: &str, factory: AdapterFactory) {
        let key = source_id.trim().to_ascii_uppercase();
        if !self.catalog.contains(&key) {
            warn!(source_id = %key, "Registering adapter for a source missing from the catalog");
        }
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, factory);
    }

    /// Per-source fetch settings replacing the base configuration
    pub fn configure(&self, config: SourceConfig) -> Result<()> {
        config.validate()?;
        self.overrides
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(config.source_id.trim().to_ascii_uppercase(), config);
        Ok(())
    }

    pub fn is_registered(&self, source_id: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&source_id.trim().to_ascii_uppercase())
    }

    /// Registered source ids, sorted
    pub fn registered(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Build the adapter for `source_id`.
    ///
    /// Fails with a configuration error if the id is not in the catalog.
    pub fn resolve(&self, source_id: &str, force_generic: bool) -> Result<Box<dyn SourceAdapter>> {
        let country = self
            .catalog
            .lookup(source_id)
            .ok_or_else(|| TariffError::config(format!("unknown source id '{}'", source_id)))?;

        let config = self
            .overrides
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&country.iso2)
            .cloned()
            .unwrap_or_else(|| self.base_config.for_source(country.iso2.clone()));
        let ctx = AdapterContext::new(self.catalog.as_ref(), config)?;

        let factory = if force_generic {
            None
        } else {
            self.factories
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(&country.iso2)
                .copied()
        };

        let adapter = match factory {
            Some(factory) => factory(ctx),
            None => GenericAdapter::boxed(ctx),
        };
        debug!(source_id = %country.iso2, adapter = adapter.kind(), "Adapter resolved");
        Ok(adapter)
    }

    pub fn resolve_by_priority(&self, tier: u8) -> Vec<Box<dyn SourceAdapter>> {
        self.resolve_each(self.catalog.list_by_priority(tier))
    }

    pub fn resolve_by_region(&self, region: &str) -> Vec<Box<dyn SourceAdapter>> {
        self.resolve_each(self.catalog.list_by_region(region))
    }

    pub fn resolve_by_bloc(&self, bloc: &str) -> Vec<Box<dyn SourceAdapter>> {
        self.resolve_each(self.catalog.list_by_bloc(bloc))
    }

    pub fn resolve_all(&self) -> Vec<Box<dyn SourceAdapter>> {
        self.resolve_each(self.catalog.list_all())
    }

    /// Resolve each id; failures are logged and skipped
    pub fn resolve_each<I, S>(&self, ids: I) -> Vec<Box<dyn SourceAdapter>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ids.into_iter()
            .filter_map(|id| match self.resolve(id.as_ref(), false) {
                Ok(adapter) => Some(adapter),
                Err(e) => {
                    warn!(source_id = id.as_ref(), error = %e, "Skipping source");
                    None
                },
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::tests::country;
    use crate::catalog::StaticCatalog;
    use tariff_common::ErrorKind;

    /// Catalog whose listing also returns an id it cannot resolve
    struct LeakyCatalog(StaticCatalog);

    impl ReferenceCatalog for LeakyCatalog {
        fn lookup(&self, id: &str) -> Option<tariff_common::types::CountryConfig> {
            self.0.lookup(id)
        }
        fn list_by_region(&self, region: &str) -> Vec<String> {
            self.0.list_by_region(region)
        }
        fn list_by_bloc(&self, bloc: &str) -> Vec<String> {
            self.0.list_by_bloc(bloc)
        }
        fn list_by_priority(&self, tier: u8) -> Vec<String> {
            self.0.list_by_priority(tier)
        }
        fn list_all(&self) -> Vec<String> {
            let mut ids = self.0.list_all();
            ids.insert(1, "XX".to_string());
            ids
        }
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(vec![
            country("CI", "west_africa", &["ECOWAS", "WAEMU"], 1),
            country("GH", "west_africa", &["ECOWAS"], 2),
            country("KE", "east_africa", &["EAC"], 1),
        ])
    }

    fn registry() -> AdapterRegistry {
        AdapterRegistry::with_builtins(Arc::new(catalog()), SourceConfig::new("default"))
    }

    #[test]
    fn test_resolve_falls_back_to_generic() {
        let registry = registry();
        let adapter = registry.resolve("ci", false).unwrap();
        assert_eq!(adapter.kind(), "generic");
        assert_eq!(adapter.source_id(), "CI");
        assert_eq!(adapter.context().config().source_id, "CI");
    }

    #[test]
    fn test_resolve_uses_registration_unless_forced() {
        let registry = registry();
        assert!(registry.is_registered("ke"));
        assert_eq!(registry.resolve("KE", false).unwrap().kind(), "csv");
        assert_eq!(registry.resolve("KE", true).unwrap().kind(), "generic");
    }

    #[test]
    fn test_resolve_unknown_is_configuration_error() {
        let err = registry().resolve("ZZ", false).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_register_unknown_source_is_recorded() {
        let registry = AdapterRegistry::new(Arc::new(catalog()), SourceConfig::new("default"));
        registry.register("zz", GenericAdapter::boxed);
        assert_eq!(registry.registered(), vec!["ZZ"]);
        // Still not resolvable: the catalog does not know it
        assert!(registry.resolve("ZZ", false).is_err());
    }

    #[test]
    fn test_per_source_configuration() {
        let registry = registry();
        let mut config = SourceConfig::new("gh");
        config.max_retries = 7;
        registry.configure(config).unwrap();

        let adapter = registry.resolve("GH", false).unwrap();
        assert_eq!(adapter.context().config().max_retries, 7);
        assert_eq!(adapter.context().executor().max_retries(), 7);

        let mut bad = SourceConfig::new("GH");
        bad.rate_limit_calls = 0;
        assert!(registry.configure(bad).is_err());
    }

    #[test]
    fn test_bulk_resolution() {
        let registry = registry();
        let ids = |adapters: Vec<Box<dyn SourceAdapter>>| {
            adapters.iter().map(|a| a.source_id().to_string()).collect::<Vec<_>>()
        };

        assert_eq!(ids(registry.resolve_by_priority(1)), vec!["CI", "KE"]);
        assert_eq!(ids(registry.resolve_by_region("west_africa")), vec!["CI", "GH"]);
        assert_eq!(ids(registry.resolve_by_bloc("EAC")), vec!["KE"]);
        assert_eq!(ids(registry.resolve_each(["CI", "nope", "KE"])), vec!["CI", "KE"]);
    }

    #[test]
    fn test_resolve_all_skips_invalid_ids() {
        let registry = AdapterRegistry::with_builtins(
            Arc::new(LeakyCatalog(catalog())),
            SourceConfig::new("default"),
        );
        let adapters = registry.resolve_all();
        assert_eq!(adapters.len(), 3);
    }
}
