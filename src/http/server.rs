//! Protocol frontend.
//!
//! # Responsibilities
//! - Create the Axum router for the configured protocol mode
//! - Serve HTTP/1.1 and HTTP/2 (h2c for gRPC) on one listener
//! - Wire up middleware (request ID, tracing, body limit, timeout)
//! - Hand each request to the dispatcher
//! - Drain in-flight requests on shutdown, up to the grace period

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::{self, AdminState};
use crate::config::RuntimeConfig;
use crate::dispatch::{GrpcDispatcher, HttpDispatcher};
use crate::handler::HandlerDescriptor;
use crate::http::request::{propagate_request_id_layer, request_span, set_request_id_layer};
use crate::inflight::RequestCounter;
use crate::lifecycle::Shutdown;

/// A constructed, bound handler ready to accept traffic.
pub struct Server {
    config: RuntimeConfig,
    descriptor: Arc<HandlerDescriptor>,
    counter: Arc<dyn RequestCounter>,
    app: Router,
}

impl Server {
    pub(crate) fn new(
        config: RuntimeConfig,
        descriptor: HandlerDescriptor,
        counter: Arc<dyn RequestCounter>,
        app: Router,
    ) -> Self {
        Self {
            config,
            descriptor: Arc::new(descriptor),
            counter,
            app,
        }
    }

    pub fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    /// The in-flight counter the autoscaler reads.
    pub fn counter(&self) -> Arc<dyn RequestCounter> {
        Arc::clone(&self.counter)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The traffic router, without a listener.
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    /// Admin/autoscaler router sharing this server's counter and descriptor.
    pub fn admin_router(&self) -> Router {
        admin::setup_admin_router(AdminState::new(
            Arc::clone(&self.descriptor),
            Arc::clone(&self.counter),
            &self.config.admin.api_key,
        ))
    }

    /// Serve until `shutdown` fires, then drain for at most the grace period.
    pub async fn run(self, listener: TcpListener, shutdown: Arc<Shutdown>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            api = %self.descriptor.api,
            mode = %self.descriptor.mode,
            operations = ?self.descriptor.operations,
            "Runtime listening"
        );

        let mut stop = shutdown.subscribe();
        let mut deadline = shutdown.subscribe();
        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        let counter = self.counter;

        let server = axum::serve(listener, self.app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("Shutdown signal received, draining");
            })
            .into_future();

        tokio::select! {
            result = server => result?,
            _ = async move {
                let _ = deadline.recv().await;
                tokio::time::sleep(grace).await;
            } => {
                tracing::warn!(
                    in_flight = ?counter.snapshot(),
                    grace_secs = grace.as_secs(),
                    "Grace period elapsed, abandoning in-flight requests"
                );
            }
        }

        tracing::info!("Runtime stopped");
        Ok(())
    }
}

/// Router for HTTP mode: every declared verb at `/`.
#[allow(deprecated)]
pub(crate) fn http_router(dispatcher: Arc<HttpDispatcher>, config: &RuntimeConfig) -> Router {
    Router::new()
        .route("/", any(http_entry))
        .with_state(dispatcher)
        .route("/healthz", get(healthz))
        .layer(RequestBodyLimitLayer::new(config.limits.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
        .layer(propagate_request_id_layer())
        .layer(TraceLayer::new_for_http().make_span_with(request_span::<Body>))
        .layer(set_request_id_layer())
}

/// Router for gRPC mode: `/{package.Service}/{Method}`.
///
/// Message size is enforced by the codec, and deadlines belong to the client.
pub(crate) fn grpc_router(dispatcher: Arc<GrpcDispatcher>, config: &RuntimeConfig) -> Router {
    Router::new()
        .route("/{service}/{method}", post(grpc_entry))
        .with_state(dispatcher)
        .route("/healthz", get(healthz))
        .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
        .layer(propagate_request_id_layer())
        .layer(TraceLayer::new_for_grpc().make_span_with(request_span::<Body>))
        .layer(set_request_id_layer())
}

async fn http_entry(State(dispatcher): State<Arc<HttpDispatcher>>, request: Request<Body>) -> Response {
    dispatcher.dispatch(request).await
}

async fn grpc_entry(
    State(dispatcher): State<Arc<GrpcDispatcher>>,
    Path((service, method)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    dispatcher.dispatch(&service, &method, request).await
}

/// The listener is only bound after the handler is constructed, so reaching
/// this route means the replica is ready.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
