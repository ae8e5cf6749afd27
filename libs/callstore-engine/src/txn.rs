use std::sync::Arc;

use callstore_api::{Document, Record, StoreBackend, Version};

use crate::error::StoreError;
use crate::locks::KeyGuard;
use crate::scheduler::Admission;

/// Lifecycle of one transaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Record fetched, version captured.
    Opened,
    /// Caller holds the working copy.
    Mutating,
    /// Compare-and-swap in progress.
    Committing,
    Committed,
    /// Ended without a backend write.
    Aborted,
    /// Lost the compare-and-swap; the next attempt starts from a fresh fetch.
    ConflictRetry,
}

impl TxnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

/// Fetch `id` and decode it, returning the version the commit must match.
pub(crate) async fn fetch_for_update<R: Record>(
    backend: &dyn StoreBackend,
    admission: &Admission,
    id: &str,
) -> Result<(Version, R), StoreError> {
    let found = admission
        .run(async {
            backend
                .fetch(id)
                .await
                .map_err(|e| StoreError::from_backend(id, e))
        })
        .await?;
    let versioned = found.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    let record: R = versioned.value.into_record()?;
    Ok((versioned.version, record))
}

/// Write `record` back if `id` is still at `expected`.
pub(crate) async fn commit_record<R: Record>(
    backend: &dyn StoreBackend,
    admission: &Admission,
    id: &str,
    expected: Version,
    record: &R,
) -> Result<Version, StoreError> {
    if record.id() != id {
        return Err(StoreError::InvalidRecord(format!(
            "transaction on '{id}' changed the id to '{}'",
            record.id()
        )));
    }
    let document = Document::from_record(record)?;
    admission
        .run(async {
            backend
                .compare_and_swap(id, expected, document)
                .await
                .map_err(|e| StoreError::from_backend(id, e))
        })
        .await
}

/// Explicit transaction handle returned by `Store::begin`.
///
/// Mutate the working copy through `record_mut`, then `commit` or `abort`.
/// Dropping the handle without committing discards the changes; nothing
/// reaches the backend before `commit`.
pub struct Transaction<R: Record> {
    backend: Arc<dyn StoreBackend>,
    admission: Admission,
    _key: KeyGuard,
    id: String,
    base_version: Version,
    record: R,
    state: TxnState,
}

impl<R: Record> Transaction<R> {
    pub(crate) fn new(
        backend: Arc<dyn StoreBackend>,
        admission: Admission,
        key: KeyGuard,
        id: String,
        base_version: Version,
        record: R,
    ) -> Self {
        Self {
            backend,
            admission,
            _key: key,
            id,
            base_version,
            record,
            state: TxnState::Opened,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut R {
        self.state = TxnState::Mutating;
        &mut self.record
    }

    /// Write the working copy if nobody committed since `begin`.
    ///
    /// A lost compare-and-swap fails with `Conflict`: the handle cannot
    /// replay caller code, so retrying is up to the caller.
    pub async fn commit(mut self) -> Result<R, StoreError> {
        self.state = TxnState::Committing;
        let result = commit_record(
            self.backend.as_ref(),
            &self.admission,
            &self.id,
            self.base_version,
            &self.record,
        )
        .await;
        match result {
            Ok(version) => {
                self.state = TxnState::Committed;
                tracing::debug!(id = %self.id, %version, "transaction committed");
                Ok(self.record.clone())
            }
            Err(e) => {
                self.state = TxnState::Aborted;
                if e.is_conflict() {
                    tracing::warn!(id = %self.id, base = %self.base_version, "transaction lost compare-and-swap");
                }
                Err(e)
            }
        }
    }

    /// Discard the working copy.
    pub fn abort(mut self) {
        self.state = TxnState::Aborted;
        tracing::debug!(id = %self.id, "transaction aborted");
    }
}

impl<R: Record> Drop for Transaction<R> {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(id = %self.id, state = ?self.state, "transaction dropped without commit, discarding");
        }
    }
}

impl<R: Record + std::fmt::Debug> std::fmt::Debug for Transaction<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("base_version", &self.base_version)
            .field("state", &self.state)
            .field("record", &self.record)
            .finish()
    }
}
