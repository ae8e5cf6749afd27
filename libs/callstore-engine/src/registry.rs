use std::collections::HashMap;
use std::sync::Arc;

use callstore_api::{BackendFactory, StoreBackend};
use callstore_storage_file::FileBackendFactory;
use callstore_storage_memory::MemoryBackendFactory;

use crate::config::BackendConfig;
use crate::error::StoreError;

/// Backend factories by name. `BackendConfig::kind` selects one.
pub struct BackendRegistry {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the "memory" and "file" backends.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("memory", Arc::new(MemoryBackendFactory));
        registry.register("file", Arc::new(FileBackendFactory));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn BackendFactory>) {
        self.factories.insert(name.into(), factory);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create(&self, config: &BackendConfig) -> Result<Arc<dyn StoreBackend>, StoreError> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            StoreError::Config(format!(
                "unknown backend '{}' (available: {})",
                config.kind,
                self.names().join(", ")
            ))
        })?;
        let config_json = config.config_json()?;
        factory
            .create(&config_json)
            .map_err(|e| StoreError::Backend(e.with_context(format!("backend '{}'", config.kind))))
    }
}
