//! In-flight request accounting.
//!
//! # Data Flow
//! ```text
//! request received  → track(api) → counter += 1, InFlightGuard issued
//! dispatch finished → guard dropped (every exit path) → counter -= 1
//! autoscaler poll   → snapshot() → { api → count }
//! ```
//!
//! # Design Decisions
//! - One atomic counter per logical API; no lock on the hot path
//! - The tracker is injected, never global, so tests own their counters
//! - Counters live in memory only and start at zero on every restart

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::observability::metrics;

/// Counter component read by the autoscaler.
pub trait RequestCounter: Send + Sync + 'static {
    fn increment(&self, api: &str);
    fn decrement(&self, api: &str);
    fn snapshot(&self) -> BTreeMap<String, u64>;
}

/// Per-API atomic counters.
#[derive(Debug, Default)]
pub struct InFlightTracker {
    counters: DashMap<String, Arc<AtomicU64>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, api: &str) -> Arc<AtomicU64> {
        if let Some(counter) = self.counters.get(api) {
            return Arc::clone(counter.value());
        }
        Arc::clone(
            self.counters
                .entry(api.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .value(),
        )
    }

    /// Current count for one API.
    pub fn get(&self, api: &str) -> u64 {
        self.counters
            .get(api)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Count a request and return a guard that releases it on drop.
    pub fn track(self: &Arc<Self>, api: &str) -> InFlightGuard {
        InFlightGuard::new(Arc::clone(self) as Arc<dyn RequestCounter>, api)
    }
}

impl RequestCounter for InFlightTracker {
    fn increment(&self, api: &str) {
        let current = self.counter(api).fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_in_flight(api, current);
    }

    fn decrement(&self, api: &str) {
        let counter = self.counter(api);
        let previous = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1))
            .unwrap_or(0);
        metrics::record_in_flight(api, previous.saturating_sub(1));
    }

    fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::SeqCst)))
            .collect()
    }
}

/// Releases one in-flight count when dropped.
pub struct InFlightGuard {
    counter: Arc<dyn RequestCounter>,
    api: Arc<str>,
}

impl InFlightGuard {
    /// Increment `api` on `counter`; the matching decrement happens on drop.
    pub fn new(counter: Arc<dyn RequestCounter>, api: impl Into<Arc<str>>) -> Self {
        let api = api.into();
        counter.increment(&api);
        Self { counter, api }
    }
}

impl std::fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightGuard").field("api", &self.api).finish()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.decrement(&self.api);
        tracing::trace!(api = %self.api, "Request finished");
    }
}
