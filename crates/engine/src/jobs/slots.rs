use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Fixed set of numbered worker slots. At most `size` guards exist at once.
#[derive(Debug)]
pub(crate) struct SlotPool {
    semaphore: Arc<Semaphore>,
    free: Mutex<Vec<usize>>,
    size: usize,
}

impl SlotPool {
    pub(crate) fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(size)),
            free: Mutex::new((0..size).rev().collect()),
            size,
        })
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot. `None` only if the pool was closed.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        // A permit guarantees a free index.
        let index = self
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_default();
        Some(SlotGuard {
            index,
            pool: Arc::clone(self),
            _permit: permit,
        })
    }
}

/// Holds one slot; returns it to the pool on drop.
#[derive(Debug)]
pub(crate) struct SlotGuard {
    index: usize,
    pool: Arc<SlotPool>,
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // Index goes back before the permit is released (fields drop after this).
        self.pool
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(self.index);
    }
}
