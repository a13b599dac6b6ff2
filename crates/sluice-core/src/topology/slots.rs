//! Task slots shared between graph runs.
//!
//! A named pool caps the number of tasks running at once across every run
//! that uses it, and the optional global limit caps all runs of the process.
//! A task holds one permit of its pool and one of the global limit while it
//! runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Reference-counted handle to [`SlotPools`].
pub type SlotPoolsRef = Arc<SlotPools>;

/// Named task pools plus the process-wide task limit.
#[derive(Debug, Default)]
pub struct SlotPools {
    global: Option<Arc<Semaphore>>,
    pools: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SlotPools {
    pub fn new(total_concurrency: Option<usize>) -> Self {
        Self {
            global: total_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide limit, if one is configured.
    pub fn global(&self) -> Option<Arc<Semaphore>> {
        self.global.clone()
    }

    /// Semaphore of pool `name`. The first registration fixes its size.
    pub fn pool(&self, name: &str, slots: usize) -> Arc<Semaphore> {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        pools
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(slots.max(1))))
            .clone()
    }
}

/// Permits held by a running task.
pub(crate) struct Slot {
    _pool: Option<OwnedSemaphorePermit>,
    _global: Option<OwnedSemaphorePermit>,
}

/// Acquire the pool permit, then the global one. Returns `None` when
/// cancelled while waiting.
pub(crate) async fn acquire(
    pool: Option<Arc<Semaphore>>,
    global: Option<Arc<Semaphore>>,
    shutdown: &CancellationToken,
) -> Option<Slot> {
    let pool = match pool {
        Some(semaphore) => Some(
            shutdown
                .run_until_cancelled(semaphore.acquire_owned())
                .await?
                .ok()?,
        ),
        None => None,
    };
    let global = match global {
        Some(semaphore) => Some(
            shutdown
                .run_until_cancelled(semaphore.acquire_owned())
                .await?
                .ok()?,
        ),
        None => None,
    };
    Some(Slot {
        _pool: pool,
        _global: global,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_is_shared_by_name() {
        let pools = SlotPools::new(None);
        let first = pools.pool("bigquery_serial", 1);
        let second = pools.pool("bigquery_serial", 4);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.available_permits(), 1);

        let other = pools.pool("other", 2);
        assert!(!Arc::ptr_eq(&first, &other));
        assert!(pools.global().is_none());
    }

    #[tokio::test]
    async fn test_slot_holds_both_permits() {
        let pools = SlotPools::new(Some(2));
        let pool = pools.pool("bq", 1);
        let shutdown = CancellationToken::new();

        let slot = acquire(Some(pool.clone()), pools.global(), &shutdown)
            .await
            .unwrap();
        assert_eq!(pool.available_permits(), 0);
        assert_eq!(pools.global().unwrap().available_permits(), 1);

        drop(slot);
        assert_eq!(pool.available_permits(), 1);
        assert_eq!(pools.global().unwrap().available_permits(), 2);
    }

    #[tokio::test]
    async fn test_acquire_cancelled_while_waiting() {
        let pools = SlotPools::new(None);
        let pool = pools.pool("bq", 1);
        let shutdown = CancellationToken::new();
        let _held = acquire(Some(pool.clone()), None, &shutdown).await.unwrap();

        shutdown.cancel();
        assert!(acquire(Some(pool), None, &shutdown).await.is_none());
    }
}
