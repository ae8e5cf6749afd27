use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use callstore_api::{BackendError, Continuation, Document, IndexPage, StoreBackend, Version, Versioned};
use callstore_storage_memory::{MemoryTable, TableSnapshot};

use super::config::FileBackendConfig;

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    let mut f = tokio::fs::File::create(path)
        .await
        .map_err(|e| BackendError::io(format!("create {}: {e}", path.display())))?;
    f.write_all(bytes)
        .await
        .map_err(|e| BackendError::io(format!("write {}: {e}", path.display())))?;
    f.sync_all()
        .await
        .map_err(|e| BackendError::io(format!("sync {}: {e}", path.display())))
}

// ════════════════════════════════════════════════════════════════
//  FileBackend
// ════════════════════════════════════════════════════════════════

/// Durable backend keeping the whole table in one JSON snapshot file.
///
/// Every mutation is applied to a copy of the table, written to
/// `<file>.tmp`, fsynced and renamed over the snapshot. Only then does the
/// in-memory table move forward, so a failed write leaves both the file and
/// the served state at the previous version.
pub struct FileBackend {
    data_dir: PathBuf,
    path: PathBuf,
    state: Mutex<Option<MemoryTable>>,
}

impl FileBackend {
    pub fn new(config: &FileBackendConfig) -> Self {
        let data_dir = PathBuf::from(&config.data_dir);
        let path = data_dir.join(&config.file_name);
        Self {
            data_dir,
            path,
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<MemoryTable, BackendError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let snapshot: TableSnapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| BackendError::format_err(format!("{}: {e}", self.path.display())))?;
                tracing::debug!(
                    path = %self.path.display(),
                    records = snapshot.entries.len(),
                    "loaded snapshot"
                );
                Ok(MemoryTable::from_snapshot(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MemoryTable::new()),
            Err(e) => Err(BackendError::io(format!("read {}: {e}", self.path.display()))),
        }
    }

    async fn ensure_loaded<'g>(
        &self,
        slot: &'g mut Option<MemoryTable>,
    ) -> Result<&'g mut MemoryTable, BackendError> {
        if slot.is_none() {
            *slot = Some(self.load().await?);
        }
        slot.as_mut()
            .ok_or_else(|| BackendError::new("file backend state unavailable"))
    }

    async fn persist(&self, table: &MemoryTable) -> Result<(), BackendError> {
        let bytes = serde_json::to_vec(&table.snapshot())?;
        let tmp = self.path.with_file_name(format!(
            "{}.tmp",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));

        let written = match write_synced(&tmp, &bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, &self.path)
                .await
                .map_err(|e| BackendError::io(format!("rename {}: {e}", self.path.display()))),
            Err(e) => Err(e),
        };
        if written.is_err() {
            if let Err(rm) = tokio::fs::remove_file(&tmp).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %tmp.display(), error = %rm, "failed to remove temp snapshot");
                }
            }
        }
        written
    }

    async fn read_with<T>(
        &self,
        f: impl FnOnce(&MemoryTable) -> Result<T, BackendError> + Send,
    ) -> Result<T, BackendError> {
        let mut guard = self.state.lock().await;
        let table = self.ensure_loaded(&mut guard).await?;
        f(table)
    }

    async fn write_with<T: Send>(
        &self,
        f: impl FnOnce(&mut MemoryTable) -> Result<T, BackendError> + Send,
    ) -> Result<T, BackendError> {
        let mut guard = self.state.lock().await;
        let table = self.ensure_loaded(&mut guard).await?;
        let mut next = table.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *table = next;
        Ok(out)
    }
}

impl StoreBackend for FileBackend {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async {
            tokio::fs::create_dir_all(&self.data_dir)
                .await
                .map_err(|e| BackendError::io(format!("mkdir {}: {e}", self.data_dir.display())))?;
            let table = self.load().await?;
            *self.state.lock().await = Some(table);
            Ok(())
        })
    }

    fn fetch(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Versioned<Document>>, BackendError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move { self.read_with(|t| Ok(t.get(&id))).await })
    }

    fn fetch_by_index(
        &self,
        index_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Versioned<Document>>, BackendError>> + Send + '_>> {
        let index_key = index_key.to_string();
        Box::pin(async move { self.read_with(|t| Ok(t.first_by_index(&index_key))).await })
    }

    fn insert(
        &self,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<Version, BackendError>> + Send + '_>> {
        Box::pin(async move { self.write_with(|t| t.insert(document)).await })
    }

    fn compare_and_swap(
        &self,
        id: &str,
        expected: Version,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<Version, BackendError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            self.write_with(|t| t.compare_and_swap(&id, expected, document))
                .await
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
            self.read_with(|t| t.list_by_index(&index_key, count, after.as_ref()))
                .await
        })
    }

    fn remove(
        &self,
        id: &str,
        expected: Version,
    ) -> Pin<Box<dyn Future<Output = Result<bool, BackendError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            let table = self.ensure_loaded(&mut guard).await?;
            if table.get(&id).is_none() {
                return Ok(false);
            }
            let mut next = table.clone();
            let removed = next.remove(&id, expected)?;
            self.persist(&next).await?;
            *table = next;
            Ok(removed)
        })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async {
            let guard = self.state.lock().await;
            match guard.as_ref() {
                Some(table) => self.persist(table).await,
                None => Ok(()),
            }
        })
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
