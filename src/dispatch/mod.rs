//! Invocation engine.
//!
//! # Data Flow
//! ```text
//! request
//!     → resolve operation (verb / service+method)   → MethodNotAllowed
//!     → admission.rs: count in flight, wait for a permit  → Overloaded
//!     → decode payload                               → Decode
//!     → invoke handler method on its own task        → Handler
//!     → split (Result, Callback), encode             → Encode
//!     → response body wrapped in DeliveryBody (holds the Lease)
//!     → body fully written → callback scheduled
//!     → last Lease clone dropped → in-flight decremented, permit released
//! ```
//!
//! # Design Decisions
//! - Every failure is converted to an encoded response here and logged once
//! - The in-flight count is released by RAII on every exit path, including
//!   client disconnects and transport write failures
//! - Handler methods run on a spawned task: a panic becomes a handler
//!   failure, and a client disconnect lets a streaming handler observe the
//!   end of its input instead of being cancelled mid-read
//! - No retries: a handler failure is terminal for that request

pub mod admission;
pub mod grpc;
pub mod http;

use axum::body::Body;
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::callback::{Callback, CallbackScheduler, DeliveryBody};
use crate::error::{DispatchError, HandlerError};

pub use admission::{Admission, Lease};
pub use grpc::GrpcDispatcher;
pub use http::HttpDispatcher;

/// Run a handler future on its own task, keeping `lease` alive until it
/// finishes even if the caller stops waiting.
pub(crate) async fn invoke<T: Send + 'static>(
    fut: BoxFuture<'static, Result<T, HandlerError>>,
    lease: Lease,
) -> Result<T, DispatchError> {
    let task = tokio::spawn(async move {
        let _lease = lease;
        fut.await
    });
    match task.await {
        Ok(result) => result.map_err(DispatchError::Handler),
        Err(e) => Err(DispatchError::Handler(HandlerError::from_error(
            "handler method panicked",
            e,
        ))),
    }
}

/// Hand the response to the transport, holding `lease` until the body is
/// released and scheduling `callback` for when it has been fully written.
pub(crate) fn deliver(
    response: Response,
    lease: Option<Lease>,
    callback: Option<Callback>,
    scheduler: &CallbackScheduler,
) -> Response {
    let (parts, body) = response.into_parts();
    let mut body = DeliveryBody::new(body, lease);
    if let Some(callback) = callback {
        let delivered = body.on_delivered();
        scheduler.schedule(callback, delivered);
    }
    Response::from_parts(parts, Body::new(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflight::InFlightTracker;
    use futures_util::FutureExt;
    use std::sync::Arc;

    #[tokio::test]
    async fn panics_become_handler_failures() {
        let tracker = Arc::new(InFlightTracker::new());
        let lease = Lease::new(tracker.track("iris"), None);
        let fut: BoxFuture<'static, Result<(), HandlerError>> = async { panic!("index out of range") }.boxed();
        let result = invoke(fut, lease).await;
        assert!(matches!(result, Err(DispatchError::Handler(_))));
        assert_eq!(tracker.get("iris"), 0);
    }

    #[tokio::test]
    async fn abandoned_invocations_keep_their_lease_until_done() {
        let tracker = Arc::new(InFlightTracker::new());
        let lease = Lease::new(tracker.track("iris"), None);
        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let fut = async move {
            let _ = wait.await;
            Ok(())
        }
        .boxed();

        let call = tokio::spawn(invoke(fut, lease));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        call.abort();
        let _ = call.await;
        assert_eq!(tracker.get("iris"), 1);

        release.send(()).unwrap();
        for _ in 0..100 {
            if tracker.get("iris") == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(tracker.get("iris"), 0);
    }
}
