//! Engine tag to adapter dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use super::bigquery::BigQueryAdapter;
use super::mysql::MySqlAdapter;
use super::postgres::PostgresAdapter;
use super::snowflake::SnowflakeAdapter;
use super::sqlite::SqliteAdapter;
use super::worker::{WorkerAdapter, WorkerLauncher};
use super::{Adapter, EngineError, EngineKind, EngineResult};
use crate::config::{Settings, SystemConfig};

/// Fixed table of adapters, built once at startup.
///
/// Lookups never mutate the table; supporting another engine means
/// registering another adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<EngineKind, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in adapter.
    pub fn with_defaults(settings: &Settings) -> Self {
        let launcher = WorkerLauncher::from_settings(settings);

        let mut registry = Self::new();
        registry.register(Arc::new(PostgresAdapter));
        registry.register(Arc::new(MySqlAdapter));
        registry.register(Arc::new(SqliteAdapter));
        registry.register(Arc::new(BigQueryAdapter));
        registry.register(Arc::new(SnowflakeAdapter::default()));
        registry.register(Arc::new(WorkerAdapter::new(EngineKind::SqlServer, launcher.clone())));
        registry.register(Arc::new(WorkerAdapter::new(EngineKind::DuckDb, launcher)));
        registry
    }

    /// Register an adapter under its own [`EngineKind`], returning any
    /// adapter it replaced.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) -> Option<Arc<dyn Adapter>> {
        self.adapters.insert(adapter.kind(), adapter)
    }

    /// Adapter for an engine tag.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedEngine`] when the tag names no known
    /// engine or no adapter is registered for it.
    pub fn resolve(&self, tag: &str) -> EngineResult<Arc<dyn Adapter>> {
        EngineKind::from_tag(tag)
            .and_then(|kind| self.adapters.get(&kind))
            .cloned()
            .ok_or_else(|| EngineError::UnsupportedEngine(tag.to_string()))
    }

    /// Adapter for a system's engine tag.
    pub fn route(&self, config: &SystemConfig) -> EngineResult<Arc<dyn Adapter>> {
        self.resolve(&config.engine)
    }

    /// Registered engines in declaration order.
    pub fn kinds(&self) -> Vec<EngineKind> {
        let mut kinds: Vec<EngineKind> = self.adapters.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_engine() {
        let registry = AdapterRegistry::with_defaults(&Settings::default());
        assert_eq!(registry.kinds(), EngineKind::ALL.to_vec());
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = AdapterRegistry::with_defaults(&Settings::default());
        let a = registry.resolve("BigQuery").unwrap();
        let b = registry.resolve("bigquery").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.kind(), EngineKind::BigQuery);
    }

    #[test]
    fn test_unregistered_kind_is_unsupported() {
        let registry = AdapterRegistry::new();
        assert!(matches!(
            registry.resolve("postgres"),
            Err(EngineError::UnsupportedEngine(ref t)) if t == "postgres"
        ));
    }
}
