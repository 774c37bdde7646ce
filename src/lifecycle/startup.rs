//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Load the protocol schema (gRPC mode)
//! - Check the handler contract, then construct the handler exactly once
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and no listener is bound
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;

use crate::apis::ApiClient;
use crate::config::{load_config, ProtocolMode, RuntimeConfig};
use crate::dispatch::{Admission, GrpcDispatcher, HttpDispatcher};
use crate::error::StartupError;
use crate::handler::{self, GrpcHandler, HandlerConfig, HttpHandler, InitContext};
use crate::http::server::{grpc_router, http_router, Server};
use crate::inflight::{InFlightTracker, RequestCounter};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::{logging, metrics};
use crate::schema::ServiceSchema;

/// Builds a [`Server`] from validated configuration.
pub struct Runtime {
    config: RuntimeConfig,
    counter: Arc<dyn RequestCounter>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            counter: Arc::new(InFlightTracker::new()),
        }
    }

    /// Report in-flight counts to `counter` instead of a fresh tracker.
    pub fn with_counter(mut self, counter: Arc<dyn RequestCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Construct `H` and build the HTTP-mode server around it.
    pub async fn http<H: HttpHandler>(self) -> Result<Server, StartupError> {
        self.expect_mode(ProtocolMode::Http)?;
        let ctx = self.init_context()?;
        let (descriptor, routes) = handler::prepare_http::<H>(&self.config, ctx).await?;

        let api: Arc<str> = Arc::from(self.config.api.name.as_str());
        let dispatcher = HttpDispatcher::new(
            Arc::clone(&api),
            routes,
            self.admission(api),
            self.config.limits.max_body_bytes,
        );
        let app = http_router(Arc::new(dispatcher), &self.config);
        Ok(Server::new(self.config, descriptor, self.counter, app))
    }

    /// Load the schema, construct `H` and build the gRPC-mode server around it.
    pub async fn grpc<H: GrpcHandler>(self) -> Result<Server, StartupError> {
        self.expect_mode(ProtocolMode::Grpc)?;
        let proto_path = self
            .config
            .api
            .proto_path
            .as_deref()
            .ok_or_else(|| StartupError::Contract("gRPC mode requires api.proto_path".to_string()))?;
        let schema = ServiceSchema::load(Path::new(proto_path))?;

        let ctx = self.init_context()?;
        let (descriptor, routes) = handler::prepare_grpc::<H>(&self.config, &schema, ctx).await?;

        let api: Arc<str> = Arc::from(self.config.api.name.as_str());
        let dispatcher = GrpcDispatcher::new(
            Arc::clone(&api),
            routes,
            self.admission(api),
            self.config.limits.max_body_bytes,
        );
        let app = grpc_router(Arc::new(dispatcher), &self.config);
        Ok(Server::new(self.config, descriptor, self.counter, app))
    }

    fn expect_mode(&self, mode: ProtocolMode) -> Result<(), StartupError> {
        if self.config.api.protocol != mode {
            return Err(StartupError::Contract(format!(
                "configured protocol is {} but the handler serves {}",
                self.config.api.protocol, mode
            )));
        }
        Ok(())
    }

    fn init_context(&self) -> Result<InitContext, StartupError> {
        let timeout = Duration::from_secs(self.config.timeouts.request_secs);
        let apis = ApiClient::new(&self.config.apis, timeout).map_err(StartupError::Construction)?;
        Ok(InitContext::new(
            self.config.api.name.clone(),
            HandlerConfig::new(self.config.handler.clone()),
            apis,
        ))
    }

    fn admission(&self, api: Arc<str>) -> Admission {
        Admission::new(
            api,
            Arc::clone(&self.counter),
            self.config.concurrency.max_concurrency,
            self.config.concurrency.max_queue_length,
        )
    }
}

/// Load `config_path` and serve `H` over HTTP until a termination signal.
pub async fn run_http<H: HttpHandler>(config_path: &Path) -> Result<(), StartupError> {
    let config = prepare(config_path)?;
    let server = Runtime::new(config).http::<H>().await?;
    serve(server).await
}

/// Load `config_path` and serve `H` over gRPC until a termination signal.
pub async fn run_grpc<H: GrpcHandler>(config_path: &Path) -> Result<(), StartupError> {
    let config = prepare(config_path)?;
    let server = Runtime::new(config).grpc::<H>().await?;
    serve(server).await
}

fn prepare(config_path: &Path) -> Result<RuntimeConfig, StartupError> {
    let config = load_config(config_path)?;
    logging::init_logging(&config.observability);

    tracing::info!(
        config = %config_path.display(),
        api = %config.api.name,
        protocol = %config.api.protocol,
        bind_address = %config.listener.bind_address,
        max_concurrency = config.concurrency.max_concurrency,
        max_queue_length = config.concurrency.max_queue_length,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }
    Ok(config)
}

async fn serve(server: Server) -> Result<(), StartupError> {
    let shutdown = Arc::new(Shutdown::new());
    let listener = TcpListener::bind(&server.config().listener.bind_address).await?;

    if server.config().admin.enabled {
        let admin = TcpListener::bind(&server.config().admin.bind_address).await?;
        spawn_admin(admin, server.admin_router(), Arc::clone(&shutdown));
    }

    signals::spawn_signal_handler(Arc::clone(&shutdown));
    server.run(listener, shutdown).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn spawn_admin(listener: TcpListener, router: Router, shutdown: Arc<Shutdown>) {
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        match listener.local_addr() {
            Ok(addr) => tracing::info!(address = %addr, "Admin interface listening"),
            Err(e) => tracing::warn!(error = %e, "Admin listener has no local address"),
        }
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Admin server failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::HttpMethods;

    struct Echo;

    impl HttpHandler for Echo {
        fn new(_ctx: InitContext) -> Result<Self, HandlerError> {
            Ok(Echo)
        }

        fn methods(methods: &mut HttpMethods<Self>) {
            methods.post(|_handler, _request| async move { Ok::<_, HandlerError>("ok") });
        }
    }

    #[tokio::test]
    async fn mode_mismatch_is_fatal() {
        let mut config = RuntimeConfig::default();
        config.api.protocol = ProtocolMode::Grpc;
        config.api.proto_path = Some("missing.proto".into());

        let err = Runtime::new(config).http::<Echo>().await.err().unwrap();
        assert!(matches!(err, StartupError::Contract(ref m) if m.contains("grpc")));
    }

    #[tokio::test]
    async fn builds_http_server_with_descriptor() {
        let server = Runtime::new(RuntimeConfig::default()).http::<Echo>().await.unwrap();
        assert_eq!(server.descriptor().mode, ProtocolMode::Http);
        assert_eq!(server.descriptor().operations, vec!["POST".to_string()]);
        assert!(server.counter().snapshot().values().all(|count| *count == 0));
    }
}
