//! Handler contract adapter.
//!
//! # Data Flow
//! ```text
//! H::methods(&mut table)              (explicit name → method mapping)
//!     → validate against accepted verbs / schema RPCs   (fatal on mismatch)
//!     → H::new(InitContext) on the blocking pool         (exactly once)
//!     → bind table to Arc<H>
//!     → HttpRoutes | GrpcRoutes + HandlerDescriptor      (immutable)
//! ```
//!
//! # Design Decisions
//! - Methods are registered explicitly, never looked up by name per request
//! - Validation runs before construction, so a bad deployment fails fast
//!   without paying for expensive setup
//! - Construction completes before the listener is bound; no request can
//!   observe a half-built handler

pub mod config;
pub mod descriptor;
pub mod grpc;
pub mod http;

use std::sync::Arc;
use std::time::Instant;

use prost_reflect::{DescriptorPool, MessageDescriptor};

use crate::apis::ApiClient;
use crate::config::{ProtocolMode, RuntimeConfig};
use crate::error::{HandlerError, StartupError};
use crate::schema::ServiceSchema;

pub use config::HandlerConfig;
pub use descriptor::HandlerDescriptor;
pub use grpc::{GrpcHandler, GrpcMethods, GrpcRequest};
pub use http::{HttpHandler, HttpMethods, HttpRequest};

pub(crate) use grpc::GrpcRoutes;
pub(crate) use http::HttpRoutes;

/// Everything a handler constructor receives.
#[derive(Debug, Clone)]
pub struct InitContext {
    api: String,
    config: HandlerConfig,
    apis: ApiClient,
    messages: Option<DescriptorPool>,
}

impl InitContext {
    pub fn new(api: impl Into<String>, config: HandlerConfig, apis: ApiClient) -> Self {
        Self {
            api: api.into(),
            config,
            apis,
            messages: None,
        }
    }

    /// Attach the schema's message bindings (gRPC mode).
    pub fn with_messages(mut self, pool: DescriptorPool) -> Self {
        self.messages = Some(pool);
        self
    }

    /// Name of the logical API being served.
    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Client for chained calls to other logical APIs.
    pub fn apis(&self) -> &ApiClient {
        &self.apis
    }

    /// Message bindings generated from the protocol schema (gRPC mode).
    pub fn messages(&self) -> Option<&DescriptorPool> {
        self.messages.as_ref()
    }

    /// Look up a message type by fully qualified name.
    pub fn message(&self, full_name: &str) -> Result<MessageDescriptor, HandlerError> {
        self.messages
            .as_ref()
            .and_then(|pool| pool.get_message_by_name(full_name))
            .ok_or_else(|| HandlerError::new(format!("unknown message type '{}'", full_name)))
    }
}

/// Run a handler constructor once, on the blocking pool.
pub(crate) async fn construct<H, F>(ctx: InitContext, new: F) -> Result<Arc<H>, StartupError>
where
    H: Send + 'static,
    F: FnOnce(InitContext) -> Result<H, HandlerError> + Send + 'static,
{
    let started = Instant::now();
    let api = ctx.api().to_string();
    let handler = tokio::task::spawn_blocking(move || new(ctx))
        .await
        .map_err(|e| StartupError::Construction(HandlerError::from_error("handler constructor panicked", e)))?
        .map_err(StartupError::Construction)?;

    tracing::info!(
        api = %api,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Handler constructed"
    );
    Ok(Arc::new(handler))
}

/// Validate, construct and bind an HTTP handler.
pub(crate) async fn prepare_http<H: HttpHandler>(
    config: &RuntimeConfig,
    ctx: InitContext,
) -> Result<(HandlerDescriptor, HttpRoutes), StartupError> {
    let declared = &config.api.accepted_verbs;
    let mut methods = HttpMethods::<H>::new();
    H::methods(&mut methods);
    methods.validate(declared)?;

    let handler = construct(ctx, H::new).await?;
    let routes = methods.bind(handler, declared)?;

    let descriptor = HandlerDescriptor {
        api: config.api.name.clone(),
        mode: ProtocolMode::Http,
        operations: routes.allowed().to_vec(),
        service: None,
    };
    Ok((descriptor, routes))
}

/// Validate, construct and bind a gRPC handler against `schema`.
pub(crate) async fn prepare_grpc<H: GrpcHandler>(
    config: &RuntimeConfig,
    schema: &ServiceSchema,
    ctx: InitContext,
) -> Result<(HandlerDescriptor, GrpcRoutes), StartupError> {
    let mut methods = GrpcMethods::<H>::new();
    H::methods(&mut methods);
    methods.validate(schema)?;

    let ctx = ctx.with_messages(schema.pool().clone());
    let handler = construct(ctx, H::new).await?;
    let routes = methods.bind(handler, schema)?;

    let descriptor = HandlerDescriptor {
        api: config.api.name.clone(),
        mode: ProtocolMode::Grpc,
        operations: routes.names(),
        service: Some(routes.service().to_string()),
    };
    Ok((descriptor, routes))
}
