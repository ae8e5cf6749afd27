use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::BackendError;
use crate::record::{Continuation, Document, IndexPage, Version, Versioned};

/// Builds a `StoreBackend` from its JSON config.
///
/// Implementations: `MemoryBackendFactory`, `FileBackendFactory`. The engine's
/// `BackendRegistry` resolves backends by name through this trait.
pub trait BackendFactory: Send + Sync {
    fn create(&self, config_json: &str) -> Result<Arc<dyn StoreBackend>, BackendError>;
}

/// Storage backend contract.
///
/// The engine doesn't enumerate or know concrete implementations.
/// For the engine, a backend is just this trait. Every write to an existing
/// id must be expressed as a version-checked operation so that concurrent
/// writers never silently overwrite each other.
///
/// Backends: in-memory reference engine, JSON file engine. Document
/// databases, relational stores and caches implement the same contract with
/// their native conditional writes.
pub trait StoreBackend: Send + Sync {
    /// Prepare the backend (create directories, tables, load state).
    /// Called once before the store serves requests.
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    /// Point read by primary id. `Ok(None)` when absent.
    fn fetch(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Versioned<Document>>, BackendError>> + Send + '_>>;

    /// Most recently created document with the given index key.
    fn fetch_by_index(
        &self,
        index_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Versioned<Document>>, BackendError>> + Send + '_>>;

    /// Insert a new document. Fails with `ErrorKind::Conflict` if the id exists.
    fn insert(
        &self,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<Version, BackendError>> + Send + '_>>;

    /// Replace the document only if its current version equals `expected`.
    ///
    /// Fails with `ErrorKind::NotFound` when the id is absent and with
    /// `ErrorKind::Conflict` on version mismatch. Returns the new version.
    fn compare_and_swap(
        &self,
        id: &str,
        expected: Version,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<Version, BackendError>> + Send + '_>>;

    /// Up to `count` documents with the given index key, most recently created
    /// first, resuming after `after` when given.
    fn list_by_index(
        &self,
        index_key: &str,
        count: usize,
        after: Option<&Continuation>,
    ) -> Pin<Box<dyn Future<Output = Result<IndexPage, BackendError>> + Send + '_>>;

    /// Delete the document only if its current version equals `expected`.
    ///
    /// Returns `false` when the id is already absent, fails with
    /// `ErrorKind::Conflict` on version mismatch.
    fn remove(
        &self,
        id: &str,
        expected: Version,
    ) -> Pin<Box<dyn Future<Output = Result<bool, BackendError>> + Send + '_>>;

    /// Flush buffered state to durable storage.
    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    /// Short backend name for logging.
    fn name(&self) -> &'static str;
}
