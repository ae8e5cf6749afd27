mod table;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use callstore_api::{
    BackendError, BackendFactory, Continuation, Document, IndexPage, StoreBackend, Version,
    Versioned,
};

pub use table::{MemoryTable, StoredEntry, TableSnapshot};

// ═══════════════════════════════════════════════════════════════
//  MemoryBackendConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_records() -> usize {
    100_000
}

#[derive(Debug, serde::Deserialize)]
pub struct MemoryBackendConfig {
    /// Inserts beyond this many live records are rejected.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Artificial delay before every operation, to widen race windows in tests.
    #[serde(default)]
    pub latency_ms: u64,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            latency_ms: 0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBackend
// ═══════════════════════════════════════════════════════════════

/// In-process reference backend. Every operation takes the table lock only
/// for the duration of one map access; no lock is held across an await that
/// waits on a caller.
pub struct MemoryBackend {
    table: RwLock<MemoryTable>,
    max_records: usize,
    latency: Duration,
}

impl MemoryBackend {
    pub fn new(max_records: usize) -> Self {
        Self::from_config(MemoryBackendConfig {
            max_records,
            ..MemoryBackendConfig::default()
        })
    }

    pub fn from_config(config: MemoryBackendConfig) -> Self {
        Self {
            table: RwLock::new(MemoryTable::new()),
            max_records: config.max_records,
            latency: Duration::from_millis(config.latency_ms),
        }
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::from_config(MemoryBackendConfig::default())
    }
}

impl StoreBackend for MemoryBackend {
    fn fetch(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Versioned<Document>>, BackendError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            self.simulate_latency().await;
            Ok(self.table.read().await.get(&id))
        })
    }

    fn fetch_by_index(
        &self,
        index_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Versioned<Document>>, BackendError>> + Send + '_>> {
        let index_key = index_key.to_string();
        Box::pin(async move {
            self.simulate_latency().await;
            Ok(self.table.read().await.first_by_index(&index_key))
        })
    }

    fn insert(
        &self,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<Version, BackendError>> + Send + '_>> {
        Box::pin(async move {
            self.simulate_latency().await;
            let mut table = self.table.write().await;
            if table.contains(&document.id) {
                return Err(BackendError::conflict(format!("id '{}' already exists", document.id)));
            }
            if table.len() >= self.max_records {
                return Err(BackendError::new(format!(
                    "memory backend full ({} records)",
                    self.max_records
                )));
            }
            table.insert(document)
        })
    }

    fn compare_and_swap(
        &self,
        id: &str,
        expected: Version,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<Version, BackendError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            self.simulate_latency().await;
            self.table.write().await.compare_and_swap(&id, expected, document)
        })
    }

    fn list_by_index(
        &self,
        index_key: &str,
        count: usize,
        after: Option<&Continuation>,
    ) -> Pin<Box<dyn Future<Output = Result<IndexPage, BackendError>> + Send + '_>> {
        let index_key = index_key.to_string();
        let after = after.cloned();
        Box::pin(async move {
            self.simulate_latency().await;
            self.table
                .read()
                .await
                .list_by_index(&index_key, count, after.as_ref())
        })
    }

    fn remove(
        &self,
        id: &str,
        expected: Version,
    ) -> Pin<Box<dyn Future<Output = Result<bool, BackendError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            self.simulate_latency().await;
            self.table.write().await.remove(&id, expected)
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBackendFactory
// ═══════════════════════════════════════════════════════════════

pub struct MemoryBackendFactory;

impl BackendFactory for MemoryBackendFactory {
    fn create(&self, config_json: &str) -> Result<Arc<dyn StoreBackend>, BackendError> {
        let config: MemoryBackendConfig = if config_json == "{}" {
            MemoryBackendConfig::default()
        } else {
            serde_json::from_str(config_json)
                .map_err(|e| BackendError::config(format!("memory backend config: {e}")))?
        };
        tracing::debug!(
            max_records = config.max_records,
            latency_ms = config.latency_ms,
            "creating memory backend"
        );
        Ok(Arc::new(MemoryBackend::from_config(config)))
    }
}
