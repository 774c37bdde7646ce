//! Runs callbacks once their response has been delivered.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::callback::{Callback, CallbackKind};
use crate::observability::metrics;

/// How a callback run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Succeeded,
    Failed,
    Panicked,
    /// The response never reached the client, so the callback did not run.
    Skipped,
}

impl CallbackOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Succeeded => "succeeded",
            CallbackOutcome::Failed => "failed",
            CallbackOutcome::Panicked => "panicked",
            CallbackOutcome::Skipped => "skipped",
        }
    }
}

/// Schedules callbacks off the response path.
#[derive(Debug, Clone)]
pub struct CallbackScheduler {
    api: Arc<str>,
}

impl CallbackScheduler {
    pub fn new(api: impl Into<Arc<str>>) -> Self {
        Self { api: api.into() }
    }

    /// Run `callback` after `delivered` fires.
    ///
    /// If the sender is dropped without firing, the response was not
    /// delivered and the callback is discarded.
    pub fn schedule(
        &self,
        callback: Callback,
        delivered: oneshot::Receiver<()>,
    ) -> tokio::task::JoinHandle<CallbackOutcome> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if delivered.await.is_err() {
                tracing::debug!(api = %scheduler.api, "Response not delivered, callback skipped");
                metrics::record_callback(&scheduler.api, CallbackOutcome::Skipped.as_str());
                return CallbackOutcome::Skipped;
            }
            scheduler.run(callback).await
        })
    }

    /// Run a callback now, isolating its failure or panic.
    pub async fn run(&self, callback: Callback) -> CallbackOutcome {
        let joined = match callback.kind {
            CallbackKind::Blocking(task) => tokio::task::spawn_blocking(task).await,
            CallbackKind::Async(fut) => tokio::spawn(fut).await,
        };

        let outcome = match joined {
            Ok(Ok(())) => CallbackOutcome::Succeeded,
            Ok(Err(e)) => {
                tracing::error!(error_kind = "callback", api = %self.api, error = %e, "Callback failed");
                CallbackOutcome::Failed
            }
            Err(join_error) => {
                tracing::error!(
                    error_kind = "callback",
                    api = %self.api,
                    error = %join_error,
                    "Callback panicked"
                );
                CallbackOutcome::Panicked
            }
        };
        metrics::record_callback(&self.api, outcome.as_str());
        outcome
    }
}
