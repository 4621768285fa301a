use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::traits::{Collector, PluginMeta};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("plugin name already registered: {0}")]
    AlreadyRegistered(String),
    #[error("invalid plugin name {0:?}: must match [a-z0-9_-]+, 1..64 chars")]
    InvalidName(String),
    #[error("no such plugin: {0}")]
    NotFound(String),
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}

struct Registration {
    plugin: Arc<dyn Collector>,
    meta: PluginMeta,
    enabled: bool,
    sequence: u64,
}

/// A snapshot of one registered plugin, for external listing (§6 `GET /plugins`).
#[derive(Clone)]
pub struct PluginEntry {
    pub name: String,
    pub meta: PluginMeta,
    pub enabled: bool,
}

/// Set of installed plugins keyed by unique name (spec §4.2). Read-mostly:
/// lookups take a read lock, registration/enable changes take a write lock,
/// mirroring the teacher's registry/coordinator shared-state discipline.
pub struct PluginRegistry {
    entries: RwLock<HashMap<String, Registration>>,
    next_sequence: AtomicU64,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub async fn register(&self, plugin: Arc<dyn Collector>) -> Result<(), RegistryError> {
        let name = plugin.name().to_string();
        validate_name(&name)?;
        let meta = plugin.metadata();
        let mut entries = self.entries.write().await;
        if entries.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        entries.insert(
            name,
            Registration {
                plugin,
                meta,
                enabled: true,
                sequence,
            },
        );
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn Collector>, RegistryError> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .filter(|r| r.enabled)
            .map(|r| Arc::clone(&r.plugin))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Like `get`, but ignores the enable flag (used by `run_now` overrides).
    pub async fn get_any(&self, name: &str) -> Result<Arc<dyn Collector>, RegistryError> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .map(|r| Arc::clone(&r.plugin))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub async fn list(&self, enabled_only: bool) -> Vec<PluginEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|(_, r)| !enabled_only || r.enabled)
            .map(|(name, r)| PluginEntry {
                name: name.clone(),
                meta: r.meta.clone(),
                enabled: r.enabled,
            })
            .collect()
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().await;
        let reg = entries
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        reg.enabled = enabled;
        Ok(())
    }

    /// Names in the order they were registered (used for tie-breaking ticks
    /// due in the same instant, spec §4.5). Each registration is stamped
    /// with a monotonic sequence number since the backing `HashMap` has no
    /// stable iteration order of its own.
    pub async fn names_in_registration_order(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut ordered: Vec<(&String, u64)> = entries.iter().map(|(name, r)| (name, r.sequence)).collect();
        ordered.sort_by_key(|(_, sequence)| *sequence);
        ordered.into_iter().map(|(name, _)| name.clone()).collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawItem;
    use crate::plugin::{CollectorContext, PluginMeta};
    use crate::domain::CollectError;
    use async_trait::async_trait;

    struct Stub(&'static str);

    #[async_trait]
    impl Collector for Stub {
        fn name(&self) -> &str {
            self.0
        }
        fn metadata(&self) -> PluginMeta {
            PluginMeta::new("demo", "@hourly")
        }
        async fn collect(&self, _ctx: &CollectorContext) -> Result<Vec<RawItem>, CollectError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn rejects_invalid_names() {
        let registry = PluginRegistry::new();
        let err = registry.register(Arc::new(Stub("Bad Name"))).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName(_)));
    }

    #[tokio::test]
    async fn rejects_duplicate_registration() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(Stub("demo"))).await.unwrap();
        let err = registry.register(Arc::new(Stub("demo"))).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn disabled_plugin_not_returned_by_get() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(Stub("demo"))).await.unwrap();
        registry.set_enabled("demo", false).await.unwrap();
        assert!(registry.get("demo").await.is_err());
        assert!(registry.get_any("demo").await.is_ok());
    }

    #[tokio::test]
    async fn names_in_registration_order_matches_insertion_sequence() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(Stub("charlie"))).await.unwrap();
        registry.register(Arc::new(Stub("alpha"))).await.unwrap();
        registry.register(Arc::new(Stub("bravo"))).await.unwrap();

        // Registered as charlie, alpha, bravo -- order must reflect that
        // insertion order, not alphabetical or HashMap iteration order.
        assert_eq!(registry.names_in_registration_order().await, vec!["charlie", "alpha", "bravo"]);
    }
}
