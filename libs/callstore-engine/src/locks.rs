use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Per-id async locks. Serializes transactions on the same id inside one
/// process; different ids never wait on each other. Entries are removed
/// as soon as no holder or waiter remains.
#[derive(Default, Clone)]
pub struct KeyLocks {
    map: Arc<Mutex<LockMap>>,
}

pub struct KeyGuard {
    key: String,
    map: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

/// A lock request still waiting for its mutex.
///
/// Fields drop in order: the acquire future (and its clone of the mutex)
/// goes first, so `holder` sees an accurate count when it cleans up after a
/// cancelled wait.
struct PendingKey {
    acquire: Pin<Box<dyn Future<Output = OwnedMutexGuard<()>> + Send>>,
    holder: KeyGuard,
}

fn lock_map(map: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    match map.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("key lock map was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = lock_map(&self.map)
            .entry(key.to_string())
            .or_default()
            .clone();
        let mut pending = PendingKey {
            acquire: Box::pin(mutex.lock_owned()),
            holder: KeyGuard {
                key: key.to_string(),
                map: self.map.clone(),
                guard: None,
            },
        };
        let guard = (&mut pending.acquire).await;
        let PendingKey { mut holder, .. } = pending;
        holder.guard = Some(guard);
        holder
    }

    /// Ids with a current holder or waiter.
    pub fn len(&self) -> usize {
        lock_map(&self.map).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = lock_map(&self.map);
        if let Some(mutex) = map.get(&self.key) {
            if Arc::strong_count(mutex) == 1 {
                map.remove(&self.key);
            }
        }
    }
}
