use std::marker::PhantomData;
use std::sync::Arc;

use callstore_api::{Continuation, Document, Record, StoreBackend};

use crate::config::{CallstoreConfig, SchedulerConfig, StoreConfig};
use crate::error::StoreError;
use crate::locks::KeyLocks;
use crate::registry::BackendRegistry;
use crate::scheduler::Scheduler;
use crate::txn::{Transaction, TxnState, commit_record, fetch_for_update};

/// One page of `search_all`, most recently created first.
#[derive(Debug, Clone)]
pub struct Page<R> {
    pub records: Vec<R>,
    /// Present when more matches remain; pass to `search_all_after`.
    pub continuation: Option<Continuation>,
}

impl<R> Default for Page<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            continuation: None,
        }
    }
}

/// Backend-agnostic record store.
///
/// Construct one per backend and share it (it is cheap to wrap in `Arc`).
/// Every operation passes through the store's `Scheduler`; call `shutdown`
/// at teardown to wait for in-flight work.
pub struct Store<R: Record> {
    backend: Arc<dyn StoreBackend>,
    scheduler: Scheduler,
    locks: KeyLocks,
    retry: StoreConfig,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Store<R> {
    pub fn new(backend: Arc<dyn StoreBackend>, retry: StoreConfig, scheduler: &SchedulerConfig) -> Self {
        Self::with_scheduler(backend, retry, Scheduler::new(scheduler))
    }

    /// Bind to an existing scheduler, e.g. one shared by several stores.
    pub fn with_scheduler(backend: Arc<dyn StoreBackend>, retry: StoreConfig, scheduler: Scheduler) -> Self {
        tracing::info!(backend = backend.name(), "store opened");
        Self {
            backend,
            scheduler,
            locks: KeyLocks::new(),
            retry,
            _record: PhantomData,
        }
    }

    /// Resolve the configured backend, initialize it and open a store on it.
    pub async fn open(config: &CallstoreConfig, registry: &BackendRegistry) -> Result<Self, StoreError> {
        let backend = registry.create(&config.backend)?;
        backend
            .init()
            .await
            .map_err(|e| StoreError::Backend(e.with_context(format!("init {} backend", config.backend.kind))))?;
        Ok(Self::new(backend, config.store.clone(), &config.scheduler))
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Point read. Absence is `Ok(None)`.
    pub async fn get(&self, id: &str) -> Result<Option<R>, StoreError> {
        let found = self
            .scheduler
            .submit(async {
                self.backend
                    .fetch(id)
                    .await
                    .map_err(|e| StoreError::from_backend(id, e))
            })
            .await?;
        tracing::debug!(id, found = found.is_some(), "get");
        found
            .map(|v| v.value.into_record::<R>())
            .transpose()
            .map_err(StoreError::from)
    }

    /// Most recently created record with `index_key`.
    pub async fn search_one(&self, index_key: &str) -> Result<Option<R>, StoreError> {
        let found = self
            .scheduler
            .submit(async {
                self.backend
                    .fetch_by_index(index_key)
                    .await
                    .map_err(StoreError::Backend)
            })
            .await?;
        tracing::debug!(index_key, found = found.is_some(), "search_one");
        found
            .map(|v| v.value.into_record::<R>())
            .transpose()
            .map_err(StoreError::from)
    }

    /// Up to `count` records with `index_key`, newest first. No match gives an
    /// empty page, never an error.
    pub async fn search_all(&self, index_key: &str, count: usize) -> Result<Page<R>, StoreError> {
        self.list(index_key, count, None).await
    }

    /// Continue a `search_all` listing.
    pub async fn search_all_after(
        &self,
        index_key: &str,
        count: usize,
        continuation: &Continuation,
    ) -> Result<Page<R>, StoreError> {
        self.list(index_key, count, Some(continuation)).await
    }

    async fn list(
        &self,
        index_key: &str,
        count: usize,
        after: Option<&Continuation>,
    ) -> Result<Page<R>, StoreError> {
        let page = self
            .scheduler
            .submit(async {
                self.backend
                    .list_by_index(index_key, count, after)
                    .await
                    .map_err(StoreError::Backend)
            })
            .await?;
        let records = page
            .documents
            .into_iter()
            .map(|v| v.value.into_record::<R>())
            .collect::<Result<Vec<R>, _>>()?;
        tracing::debug!(index_key, count, returned = records.len(), "search_all");
        Ok(Page {
            records,
            continuation: page.continuation,
        })
    }

    /// Persist a new record. A duplicate id fails with `Conflict`.
    pub async fn create(&self, record: &R) -> Result<(), StoreError> {
        let id = record.id();
        let document = Document::from_record(record)?;
        let version = self
            .scheduler
            .submit(async {
                self.backend
                    .insert(document)
                    .await
                    .map_err(|e| StoreError::from_backend(id, e))
            })
            .await?;
        tracing::debug!(id, index_key = record.index_key(), %version, "created");
        Ok(())
    }

    /// Delete `id`. Returns `false` if it was already absent.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let admission = self.scheduler.admit()?;
        let _key = self.locks.lock(id).await;
        let backend = self.backend.as_ref();

        let current = admission
            .run(async { backend.fetch(id).await.map_err(|e| StoreError::from_backend(id, e)) })
            .await?;
        let Some(current) = current else {
            return Ok(false);
        };
        let removed = admission
            .run(async {
                backend
                    .remove(id, current.version)
                    .await
                    .map_err(|e| StoreError::from_backend(id, e))
            })
            .await?;
        tracing::debug!(id, removed, "delete");
        Ok(removed)
    }

    /// Run `mutate` against the current record and commit the result.
    ///
    /// Nothing is written unless `mutate` returns `Ok`; its error is returned
    /// as-is. If another writer commits first, the record is fetched again and
    /// `mutate` re-applied, up to `max_retries` times, after which the call
    /// fails with `Conflict`. Returns the committed record.
    pub async fn transaction<F, E>(&self, id: &str, mut mutate: F) -> Result<R, E>
    where
        F: FnMut(&mut R) -> Result<(), E>,
        E: From<StoreError>,
    {
        let admission = self.scheduler.admit()?;
        let _key = self.locks.lock(id).await;
        let backend = self.backend.as_ref();
        let mut attempt: u32 = 0;

        loop {
            let (base, mut record) = fetch_for_update::<R>(backend, &admission, id).await?;
            tracing::trace!(id, %base, attempt, state = ?TxnState::Opened, "transaction opened");

            if let Err(e) = mutate(&mut record) {
                tracing::debug!(id, %base, "transaction aborted by caller, nothing written");
                return Err(e);
            }

            match commit_record(backend, &admission, id, base, &record).await {
                Ok(version) => {
                    tracing::debug!(id, %version, attempt, "transaction committed");
                    return Ok(record);
                }
                Err(e) if e.is_conflict() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        id,
                        %base,
                        attempt,
                        state = ?TxnState::ConflictRetry,
                        delay_ms = delay.as_millis() as u64,
                        "concurrent commit detected, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_conflict() {
                        tracing::warn!(id, attempts = attempt + 1, "transaction gave up after conflicts");
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// Open an explicit transaction on `id`. Fails with `NotFound` if absent.
    ///
    /// The handle holds the id's lock until it is committed, aborted or
    /// dropped, so keep it short-lived.
    pub async fn begin(&self, id: &str) -> Result<Transaction<R>, StoreError> {
        let admission = self.scheduler.admit()?;
        let key = self.locks.lock(id).await;
        let (base, record) = fetch_for_update::<R>(self.backend.as_ref(), &admission, id).await?;
        tracing::trace!(id, %base, "transaction handle opened");
        Ok(Transaction::new(
            self.backend.clone(),
            admission,
            key,
            id.to_string(),
            base,
            record,
        ))
    }

    /// Stop admitting operations, wait for in-flight ones, flush the backend.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.scheduler.drain().await;
        self.backend.flush().await.map_err(StoreError::Backend)?;
        tracing::info!(backend = self.backend.name(), "store shut down");
        Ok(())
    }
}
