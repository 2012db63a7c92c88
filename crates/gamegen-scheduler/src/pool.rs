//! Bounded pool of in-flight pipeline tasks.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Caps the number of concurrently running pipeline tasks.
///
/// A [`Slot`] is a held place in the pool. It is released when dropped, so a
/// task that owns its slot gives it back exactly once however it ends,
/// including by panic.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// A reserved place in a [`WorkerPool`].
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Reserve a slot if one is free.
    pub fn try_acquire(&self) -> Option<Slot> {
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .ok()
            .map(|permit| Slot { _permit: permit })
    }

    /// Run `task` on the runtime, holding `slot` until it finishes.
    pub fn spawn<F>(&self, slot: Slot, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(async move {
            let _slot = slot;
            task.await
        })
    }

    /// Wait until every slot is free.
    pub async fn wait_idle(&self) {
        let Ok(count) = u32::try_from(self.capacity) else {
            return;
        };
        if let Ok(all) = self.slots.acquire_many(count).await {
            drop(all);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let pool = WorkerPool::new(2);
        let a = pool.try_acquire();
        let b = pool.try_acquire();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.in_flight(), 2);

        drop(a);
        assert_eq!(pool.in_flight(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_slot_released_when_task_finishes() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = oneshot::channel::<()>();

        let slot = pool.try_acquire().unwrap();
        let handle = pool.spawn(slot, async move {
            let _ = rx.await;
            7
        });
        assert_eq!(pool.in_flight(), 1);

        tx.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), 7);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_slot_released_when_task_panics() {
        let pool = WorkerPool::new(1);
        let slot = pool.try_acquire().unwrap();

        let handle = pool.spawn(slot, async {
            panic!("pipeline blew up");
        });

        assert!(handle.await.is_err());
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let pool = WorkerPool::new(3);
        for _ in 0..3 {
            let slot = pool.try_acquire().unwrap();
            pool.spawn(slot, tokio::time::sleep(Duration::from_millis(20)));
        }

        pool.wait_idle().await;
        assert_eq!(pool.in_flight(), 0);
    }
}
