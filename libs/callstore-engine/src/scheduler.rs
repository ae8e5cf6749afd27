//! Bounded dispatcher for backend round trips.
//!
//! Every store operation is *admitted* first, then runs each backend call
//! under a semaphore permit. Admission is tracked by a `TaskTracker`:
//! `drain()` closes admission and waits until every admitted operation has
//! finished. Nothing is cancelled; a transaction that was admitted before the
//! drain started runs to commit or abort.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;

use crate::config::SchedulerConfig;
use crate::error::StoreError;

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    permits: Semaphore,
    tracker: TaskTracker,
    queued: AtomicUsize,
    max_in_flight: usize,
    max_queued: usize,
    admission_timeout: Option<Duration>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("max_in_flight", &self.inner.max_in_flight)
            .field("in_flight", &self.in_flight())
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Proof that an operation was admitted before any drain began.
///
/// While it lives, `Scheduler::drain` keeps waiting.
pub struct Admission {
    scheduler: Scheduler,
    _token: TaskTrackerToken,
}

impl Admission {
    /// Run one backend round trip under an in-flight permit.
    pub async fn run<F, T>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let _permit = self.scheduler.inner.acquire().await?;
        op.await
    }
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        let max_in_flight = config.max_in_flight.max(1);
        Self {
            inner: Arc::new(Inner {
                permits: Semaphore::new(max_in_flight),
                tracker: TaskTracker::new(),
                queued: AtomicUsize::new(0),
                max_in_flight,
                max_queued: config.max_queued,
                admission_timeout: match config.admission_timeout_ms {
                    0 => None,
                    ms => Some(Duration::from_millis(ms)),
                },
            }),
        }
    }

    /// Open a scheduler, run `f` with it, then drain before returning.
    pub async fn scoped<F, Fut, T>(config: &SchedulerConfig, f: F) -> T
    where
        F: FnOnce(Scheduler) -> Fut,
        Fut: Future<Output = T>,
    {
        let scheduler = Scheduler::new(config);
        let out = f(scheduler.clone()).await;
        scheduler.drain().await;
        out
    }

    /// Admit one operation. Fails fast once a drain has begun.
    pub fn admit(&self) -> Result<Admission, StoreError> {
        // Token first: a drain that starts after the check below must see it.
        let token = self.inner.tracker.token();
        if self.inner.tracker.is_closed() {
            return Err(StoreError::SchedulerClosed);
        }
        Ok(Admission {
            scheduler: self.clone(),
            _token: token,
        })
    }

    /// Admit and run a single-round-trip operation.
    pub async fn submit<F, T>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let admission = self.admit()?;
        admission.run(op).await
    }

    /// Stop admitting and wait for every admitted operation to finish.
    pub async fn drain(&self) {
        self.close();
        tracing::debug!(pending = self.inner.tracker.len(), "draining scheduler");
        self.inner.tracker.wait().await;
    }

    /// Stop admitting without waiting.
    pub fn close(&self) {
        self.inner.tracker.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tracker.is_closed()
    }

    /// Operations currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.inner.max_in_flight - self.inner.permits.available_permits()
    }

    /// Operations waiting for a permit.
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Admitted operations not yet finished.
    pub fn admitted(&self) -> usize {
        self.inner.tracker.len()
    }
}

struct QueuedGuard<'a>(&'a AtomicUsize);

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Inner {
    async fn acquire(&self) -> Result<SemaphorePermit<'_>, StoreError> {
        match self.permits.try_acquire() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(StoreError::SchedulerClosed),
            Err(TryAcquireError::NoPermits) => {}
        }

        if self.queued.fetch_add(1, Ordering::SeqCst) >= self.max_queued {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(limit = self.max_queued, "scheduler queue full, rejecting");
            return Err(StoreError::Saturated {
                limit: self.max_queued,
            });
        }
        let _queued = QueuedGuard(&self.queued);

        let acquired = match self.admission_timeout {
            Some(limit) => tokio::time::timeout(limit, self.permits.acquire())
                .await
                .map_err(|_| {
                    tracing::warn!(waited_ms = limit.as_millis() as u64, "admission timed out");
                    StoreError::AdmissionTimeout {
                        waited_ms: limit.as_millis() as u64,
                    }
                })?,
            None => self.permits.acquire().await,
        };
        acquired.map_err(|_| StoreError::SchedulerClosed)
    }
}
