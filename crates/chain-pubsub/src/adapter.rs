//! Adapter selection: a topic resolves to a cluster transport through a
//! `WildcardStore` keyed by topic pattern, same "exact wins, else most
//! general (shortest) prefix" rule used for path matching.

use std::sync::Arc;

use async_trait::async_trait;
use chain_core::contracts::Adapter;
use chain_core::{ChainResult, WildcardStore};
use parking_lot::RwLock;

use crate::error::{PubSubError, PubSubResult};

pub const DUMMY_ADAPTER_NAME: &str = "dummy";

/// Process-local adapter: `subscribe`/`unsubscribe`/`broadcast` are no-ops.
/// Topics routed to it never leave the node; callers bypass the
/// compress/encrypt pipeline entirely for it.
pub struct LocalAdapter;

#[async_trait]
impl Adapter for LocalAdapter {
    fn name(&self) -> &str {
        DUMMY_ADAPTER_NAME
    }

    async fn subscribe(&self, _topic: &str) {}

    async fn unsubscribe(&self, _topic: &str) {}

    async fn broadcast(&self, _topic: &str, _bytes: &[u8]) -> ChainResult<()> {
        Ok(())
    }
}

/// Per-topic-pattern adapter configuration: which adapter handles it and
/// whether that adapter's broadcasts should skip compression/encryption.
#[derive(Clone)]
pub struct AdapterConfig {
    pub adapter: Arc<dyn Adapter>,
    pub disable_compression: bool,
    pub disable_encryption: bool,
}

impl AdapterConfig {
    pub fn is_dummy(&self) -> bool {
        self.adapter.name() == DUMMY_ADAPTER_NAME
    }
}

/// Holds the active topic-pattern -> adapter mapping. Replaced wholesale by
/// `set_adapters`, which is only ever called once at process startup.
pub struct AdapterRegistry {
    store: RwLock<WildcardStore<AdapterConfig>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self { store: RwLock::new(WildcardStore::new()) }
    }

    /// Replace the whole adapter mapping. `patterns` is `(topic pattern,
    /// config)`; patterns follow the same `"prefix*"` wildcard syntax as
    /// the router. Intended for startup configuration only: a mapping
    /// replaced mid-flight does not retroactively migrate subscriptions
    /// already registered with the adapters it displaces.
    pub fn set_adapters(&self, patterns: Vec<(String, AdapterConfig)>) -> PubSubResult<()> {
        let mut store = WildcardStore::new();
        for (pattern, config) in patterns {
            store.insert(&pattern, config).map_err(PubSubError::Path)?;
        }
        *self.store.write() = store;
        Ok(())
    }

    pub fn resolve(&self, topic: &str) -> PubSubResult<AdapterConfig> {
        self.store
            .read()
            .matches(topic)
            .cloned()
            .ok_or_else(|| PubSubError::NoAdapter(topic.to_string()))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_exact_then_wildcard() {
        let registry = AdapterRegistry::new();
        registry
            .set_adapters(vec![
                ("room*".to_string(), AdapterConfig { adapter: Arc::new(LocalAdapter), disable_compression: false, disable_encryption: false }),
            ])
            .unwrap();
        assert!(registry.resolve("room:1").is_ok());
        assert!(registry.resolve("other").is_err());
    }

    #[test]
    fn dummy_adapter_reports_its_name() {
        let config = AdapterConfig { adapter: Arc::new(LocalAdapter), disable_compression: false, disable_encryption: false };
        assert!(config.is_dummy());
    }
}
