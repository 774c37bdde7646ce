//! Shared utilities for integration tests: replicas on loopback ports.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use handler_runtime::config::{ProtocolMode, RuntimeConfig};
use handler_runtime::lifecycle::{Runtime, Shutdown};
use handler_runtime::schema::ServiceSchema;
use handler_runtime::{GrpcHandler, HttpHandler, InFlightTracker, RequestCounter, Server};

pub const ECHO_PROTO: &str = r#"
syntax = "proto3";
package echo;
message Text { string value = 1; }
message Number { int64 value = 1; }
service Echo {
  rpc Say (Text) returns (Text);
  rpc Collect (stream Text) returns (Text);
  rpc Spell (Text) returns (stream Text);
  rpc Chat (stream Text) returns (stream Text);
}
"#;

/// A running replica and the handles a test needs to observe it.
pub struct Replica {
    pub addr: SocketAddr,
    pub counter: Arc<InFlightTracker>,
    pub shutdown: Arc<Shutdown>,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl Replica {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn in_flight(&self, api: &str) -> u64 {
        self.counter.get(api)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// HTTP-mode config bound to an ephemeral port with metrics off.
pub fn http_config(api: &str, verbs: &[&str]) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.api.name = api.into();
    config.api.accepted_verbs = verbs.iter().map(|v| v.to_string()).collect();
    config.concurrency.max_concurrency = 8;
    config.observability.metrics_enabled = false;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

pub fn grpc_config(api: &str, proto_path: &Path) -> RuntimeConfig {
    let mut config = http_config(api, &[]);
    config.api.protocol = ProtocolMode::Grpc;
    config.api.proto_path = Some(proto_path.display().to_string());
    config
}

pub fn write_proto(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

pub fn echo_pool(dir: &tempfile::TempDir) -> DescriptorPool {
    let path = write_proto(dir, "echo.proto", ECHO_PROTO);
    ServiceSchema::load(&path).unwrap().pool().clone()
}

pub fn text(descriptor: &MessageDescriptor, value: &str) -> DynamicMessage {
    let mut message = DynamicMessage::new(descriptor.clone());
    message.set_field_by_name("value", Value::String(value.to_string()));
    message
}

pub fn value_of(message: &DynamicMessage) -> String {
    message
        .get_field_by_name("value")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Serve an already built server on a free loopback port.
pub async fn serve(server: Server, counter: Arc<InFlightTracker>) -> Replica {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Shutdown::new());
    let handle = tokio::spawn(server.run(listener, Arc::clone(&shutdown)));
    Replica {
        addr,
        counter,
        shutdown,
        handle,
    }
}

pub async fn start_http<H: HttpHandler>(config: RuntimeConfig) -> Replica {
    let counter = Arc::new(InFlightTracker::new());
    let server = Runtime::new(config)
        .with_counter(Arc::clone(&counter) as Arc<dyn RequestCounter>)
        .http::<H>()
        .await
        .expect("replica failed to start");
    serve(server, counter).await
}

pub async fn start_grpc<H: GrpcHandler>(config: RuntimeConfig) -> Replica {
    let counter = Arc::new(InFlightTracker::new());
    let server = Runtime::new(config)
        .with_counter(Arc::clone(&counter) as Arc<dyn RequestCounter>)
        .grpc::<H>()
        .await
        .expect("replica failed to start");
    serve(server, counter).await
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
