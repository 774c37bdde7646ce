//! Response body that reports when it has been fully handed to the transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::Bytes;
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use tokio::sync::oneshot;

use crate::dispatch::Lease;

/// Wraps a response body, holding the request's lease until the transport
/// releases the body and signalling delivery if every frame was written.
pub struct DeliveryBody {
    inner: Body,
    finished: bool,
    delivered: Option<oneshot::Sender<()>>,
    _lease: Option<Lease>,
}

impl DeliveryBody {
    pub fn new(inner: Body, lease: Option<Lease>) -> Self {
        Self {
            inner,
            finished: false,
            delivered: None,
            _lease: lease,
        }
    }

    /// Returns a receiver that fires once the body has been fully written.
    pub fn on_delivered(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.delivered = Some(tx);
        rx
    }
}

impl HttpBody for DeliveryBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => this.finished = true,
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.finished = true,
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for DeliveryBody {
    fn drop(&mut self) {
        // An empty body may never be polled at all.
        let complete = self.finished || self.inner.is_end_stream();
        if let Some(tx) = self.delivered.take() {
            if complete {
                let _ = tx.send(());
            }
        }
    }
}
