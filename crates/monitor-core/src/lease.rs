//! Per-shape fetch leases.
//!
//! Two callers refreshing the same [`QueryShape`] at once would both see it
//! stale and both call the remote API. Holding the shape's lease across the
//! freshness check, the fetch and the mark makes the second caller wait and
//! then find the shape fresh. Different shapes never block each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use monitor_types::QueryShape;

/// Guard held while refreshing one shape.
pub type ShapeLease = OwnedMutexGuard<()>;

/// Async mutexes keyed by canonical shape.
#[derive(Debug, Default)]
pub struct ShapeLeases {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ShapeLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `shape`.
    pub async fn acquire(&self, shape: &QueryShape) -> ShapeLease {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop entries nobody holds or waits for.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(shape.key()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Shapes currently held or waited for.
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_shape_is_exclusive() {
        let leases = Arc::new(ShapeLeases::new());
        let shape = QueryShape::things("tok1", "all");

        let held = leases.acquire(&shape).await;
        assert_eq!(leases.active(), 1);

        let waiter = {
            let leases = leases.clone();
            let shape = shape.clone();
            tokio::spawn(async move {
                let _lease = leases.acquire(&shape).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
        assert_eq!(leases.active(), 0);
    }

    #[tokio::test]
    async fn test_different_shapes_do_not_block() {
        let leases = ShapeLeases::new();
        let a = leases.acquire(&QueryShape::things("tok1", "all")).await;
        let b = leases
            .acquire(&QueryShape::states("tok1", "d1", None))
            .await;
        assert_eq!(leases.active(), 2);
        drop(a);
        drop(b);
        assert_eq!(leases.active(), 0);
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let leases = ShapeLeases::new();
        for i in 0..10 {
            let id = format!("d{}", i);
            let _lease = leases.acquire(&QueryShape::states("tok1", &id, None)).await;
        }
        let _last = leases.acquire(&QueryShape::things("tok1", "all")).await;
        let stored = leases.locks.lock().unwrap().len();
        assert_eq!(stored, 1);
    }
}
