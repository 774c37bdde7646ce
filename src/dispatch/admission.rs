//! Admission control around handler invocation.
//!
//! A request is counted in flight from the moment it is admitted to the
//! queue. At most `max_concurrency` invocations hold a permit; up to
//! `max_queue_length` more wait for one; anything beyond that is rejected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::DispatchError;
use crate::inflight::{InFlightGuard, RequestCounter};
use crate::observability::metrics;

/// Holds a request's in-flight count and concurrency permit.
///
/// Clones share one lease: the count and the permit are released when the
/// last clone drops, i.e. when both the handler task and the response body
/// are finished with it.
#[derive(Debug, Clone)]
pub struct Lease {
    _inner: Arc<LeaseInner>,
}

#[derive(Debug)]
struct LeaseInner {
    _guard: InFlightGuard,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Lease {
    pub fn new(guard: InFlightGuard, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            _inner: Arc::new(LeaseInner {
                _guard: guard,
                _permit: permit,
            }),
        }
    }
}

/// Bounded-concurrency gate for one logical API.
#[derive(Clone)]
pub struct Admission {
    api: Arc<str>,
    counter: Arc<dyn RequestCounter>,
    permits: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    max_queue: usize,
}

impl Admission {
    pub fn new(
        api: impl Into<Arc<str>>,
        counter: Arc<dyn RequestCounter>,
        max_concurrency: usize,
        max_queue: usize,
    ) -> Self {
        Self {
            api: api.into(),
            counter,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            waiting: Arc::new(AtomicUsize::new(0)),
            max_queue,
        }
    }

    /// Count the request, then wait for a permit or reject it if the queue
    /// is full. Dropping the returned future releases everything it took.
    pub async fn admit(&self) -> Result<Lease, DispatchError> {
        let guard = InFlightGuard::new(Arc::clone(&self.counter), Arc::clone(&self.api));

        if let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
            return Ok(Lease::new(guard, Some(permit)));
        }

        let slot = QueueSlot::take(&self.waiting, self.max_queue).ok_or_else(|| {
            metrics::record_rejected(&self.api);
            DispatchError::Overloaded
        })?;
        tracing::debug!(api = %self.api, queued = self.queued(), "Waiting for a handler slot");

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Overloaded)?;
        drop(slot);
        Ok(Lease::new(guard, Some(permit)))
    }

    /// Requests currently waiting for a permit.
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("api", &self.api)
            .field("available", &self.available())
            .field("queued", &self.queued())
            .field("max_queue", &self.max_queue)
            .finish()
    }
}

/// One position in the wait queue, released on drop.
struct QueueSlot {
    waiting: Arc<AtomicUsize>,
}

impl QueueSlot {
    fn take(waiting: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self {
                waiting: Arc::clone(waiting),
            })
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflight::InFlightTracker;
    use std::time::Duration;

    fn admission(tracker: &Arc<InFlightTracker>, concurrency: usize, queue: usize) -> Admission {
        Admission::new("iris", Arc::clone(tracker) as Arc<dyn RequestCounter>, concurrency, queue)
    }

    #[tokio::test]
    async fn queues_then_rejects() {
        let tracker = Arc::new(InFlightTracker::new());
        let gate = admission(&tracker, 1, 1);

        let first = gate.admit().await.unwrap();
        let queued = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.admit().await })
        };
        while gate.queued() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(tracker.get("iris"), 2);

        assert!(matches!(gate.admit().await, Err(DispatchError::Overloaded)));
        assert_eq!(tracker.get("iris"), 2);

        drop(first);
        let second = queued.await.unwrap().unwrap();
        assert_eq!(gate.queued(), 0);
        assert_eq!(tracker.get("iris"), 1);
        drop(second);
        assert_eq!(tracker.get("iris"), 0);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn cancelled_waiters_release_their_slot() {
        let tracker = Arc::new(InFlightTracker::new());
        let gate = admission(&tracker, 1, 4);
        let held = gate.admit().await.unwrap();

        let waiting = tokio::time::timeout(Duration::from_millis(20), gate.admit()).await;
        assert!(waiting.is_err());
        assert_eq!(gate.queued(), 0);
        assert_eq!(tracker.get("iris"), 1);
        drop(held);
    }

    #[tokio::test]
    async fn lease_clones_release_together() {
        let tracker = Arc::new(InFlightTracker::new());
        let gate = admission(&tracker, 2, 0);
        let lease = gate.admit().await.unwrap();
        let clone = lease.clone();
        drop(lease);
        assert_eq!(tracker.get("iris"), 1);
        assert_eq!(gate.available(), 1);
        drop(clone);
        assert_eq!(tracker.get("iris"), 0);
        assert_eq!(gate.available(), 2);
    }
}
