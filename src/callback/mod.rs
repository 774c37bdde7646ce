//! Deferred callback subsystem.
//!
//! # Data Flow
//! ```text
//! Handler returns Reply::WithCallback(output, callback)
//!     → output encoded, response body wrapped in DeliveryBody
//!     → DeliveryBody fully written and released by the transport
//!     → delivery signal (oneshot)
//!     → scheduler.rs runs the callback on its own task
//! ```
//!
//! # Design Decisions
//! - A callback runs at most once, and only if the response was delivered
//! - Callback failures and panics are logged, never propagated
//! - Callbacks run outside the admission permit and after the in-flight count drops

pub mod delivery;
pub mod scheduler;

use std::future::Future;
use std::pin::Pin;

use crate::error::HandlerError;

pub use delivery::DeliveryBody;
pub use scheduler::{CallbackOutcome, CallbackScheduler};

type BoxedTask = Box<dyn FnOnce() -> Result<(), HandlerError> + Send + 'static>;
type BoxedFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'static>>;

pub(crate) enum CallbackKind {
    /// Synchronous work, run on the blocking pool.
    Blocking(BoxedTask),
    /// Asynchronous work, run as a task.
    Async(BoxedFuture),
}

/// Zero-argument unit of work run after a response has been delivered.
pub struct Callback {
    pub(crate) kind: CallbackKind,
}

impl Callback {
    /// Callback from a synchronous closure. It may block.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), HandlerError> + Send + 'static,
    {
        Self {
            kind: CallbackKind::Blocking(Box::new(f)),
        }
    }

    /// Callback from a future.
    pub fn future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            kind: CallbackKind::Async(Box::pin(fut)),
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            CallbackKind::Blocking(_) => "blocking",
            CallbackKind::Async(_) => "async",
        };
        f.debug_struct("Callback").field("kind", &kind).finish()
    }
}
