mod config;
mod storage;

use std::sync::Arc;

use callstore_api::{BackendError, BackendFactory, StoreBackend};

pub use config::FileBackendConfig;
pub use storage::FileBackend;

// ════════════════════════════════════════════════════════════════
//  FileBackendFactory
// ════════════════════════════════════════════════════════════════

/// The returned backend loads its snapshot lazily on first use; call
/// `StoreBackend::init` to create the directory and surface load errors early.
pub struct FileBackendFactory;

impl BackendFactory for FileBackendFactory {
    fn create(&self, config_json: &str) -> Result<Arc<dyn StoreBackend>, BackendError> {
        let config: FileBackendConfig = serde_json::from_str(config_json)
            .map_err(|e| BackendError::config(format!("file backend config: {e}")))?;
        tracing::debug!(data_dir = %config.data_dir, file = %config.file_name, "creating file backend");
        Ok(Arc::new(FileBackend::new(&config)))
    }
}

#[cfg(test)]
mod tests {
    use callstore_api::{Continuation, Document, ErrorKind, Version};

    use super::*;

    fn doc(id: &str, key: &str, n: i64) -> Document {
        Document {
            id: id.into(),
            index_key: key.into(),
            body: serde_json::json!({ "n": n }),
        }
    }

    fn backend_in(dir: &tempfile::TempDir) -> FileBackend {
        FileBackend::new(&FileBackendConfig::new(dir.path().to_string_lossy()))
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let backend = backend_in(&dir);
        backend.init().await.unwrap();
        backend.insert(doc("a", "+1", 1)).await.unwrap();
        backend.insert(doc("b", "+1", 1)).await.unwrap();
        backend
            .compare_and_swap("a", Version(1), doc("a", "+1", 2))
            .await
            .unwrap();
        drop(backend);

        let reopened = backend_in(&dir);
        reopened.init().await.unwrap();
        let a = reopened.fetch("a").await.unwrap().unwrap();
        assert_eq!(a.version, Version(2));
        assert_eq!(a.value.body["n"], 2);
        assert_eq!(reopened.fetch_by_index("+1").await.unwrap().unwrap().value.id, "b");
    }

    #[tokio::test]
    async fn test_conflict_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_in(&dir);
        backend.init().await.unwrap();
        backend.insert(doc("a", "+1", 1)).await.unwrap();
        let before = tokio::fs::read(backend.path()).await.unwrap();

        let err = backend
            .compare_and_swap("a", Version(5), doc("a", "+1", 9))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(tokio::fs::read(backend.path()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_lazy_load_without_init() {
        let dir = tempfile::tempdir().unwrap();
        let first = backend_in(&dir);
        first.init().await.unwrap();
        first.insert(doc("a", "+1", 1)).await.unwrap();

        let second = backend_in(&dir);
        let err = second.insert(doc("a", "+1", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_remove_and_paging() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_in(&dir);
        backend.init().await.unwrap();
        for id in ["a", "b", "c"] {
            backend.insert(doc(id, "+1", 0)).await.unwrap();
        }
        assert!(backend.remove("b", Version(1)).await.unwrap());
        assert!(!backend.remove("b", Version(1)).await.unwrap());

        let page = backend.list_by_index("+1", 1, None).await.unwrap();
        assert_eq!(page.documents[0].value.id, "c");
        let token: Continuation = page.continuation.unwrap();
        let page = backend.list_by_index("+1", 5, Some(&token)).await.unwrap();
        let ids: Vec<_> = page.documents.iter().map(|d| d.value.id.as_str()).collect();
        assert_eq!(ids, ["a"]);
    }

    #[tokio::test]
    async fn test_failed_persist_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_in(&dir);
        backend.init().await.unwrap();
        backend.insert(doc("a", "+1", 1)).await.unwrap();

        // A non-empty directory in place of the snapshot makes the rename fail.
        tokio::fs::remove_file(backend.path()).await.unwrap();
        tokio::fs::create_dir(backend.path()).await.unwrap();
        tokio::fs::write(backend.path().join("keep"), b"x").await.unwrap();

        let err = backend.insert(doc("b", "+1", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!dir.path().join("calls.json.tmp").exists());
        assert!(backend.fetch("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("calls.json"), b"{not json")
            .await
            .unwrap();
        let err = backend_in(&dir).init().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_factory_requires_data_dir() {
        let err = FileBackendFactory.create("{}").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
        let backend = FileBackendFactory
            .create(r#"{"data_dir": "/tmp/callstore", "file_name": "x.json"}"#)
            .unwrap();
        assert_eq!(backend.name(), "file");
    }
}
