//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the runtime.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the handler runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// The logical API this replica serves.
    pub api: ApiConfig,

    /// Admission control around handler invocation.
    pub concurrency: ConcurrencyConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin / autoscaler endpoint.
    pub admin: AdminConfig,

    /// Internal addresses of other logical APIs, keyed by name.
    pub apis: BTreeMap<String, String>,

    /// Opaque handler configuration, passed unchanged to the handler constructor.
    pub handler: toml::Table,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8888").
    pub bind_address: String,

    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8888".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Wire protocol served by the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolMode {
    #[default]
    Http,
    Grpc,
}

impl std::fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolMode::Http => write!(f, "http"),
            ProtocolMode::Grpc => write!(f, "grpc"),
        }
    }
}

/// Description of the served API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Logical API name, used for in-flight accounting and logs.
    pub name: String,

    /// HTTP or gRPC.
    pub protocol: ProtocolMode,

    /// HTTP verbs the handler must implement (HTTP mode only).
    pub accepted_verbs: Vec<String>,

    /// Path to the protocol-schema file (gRPC mode only).
    pub proto_path: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            name: "api".to_string(),
            protocol: ProtocolMode::Http,
            accepted_verbs: vec!["POST".to_string()],
            proto_path: None,
        }
    }
}

/// Bounds on concurrent handler invocation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum handler invocations running at once.
    pub max_concurrency: usize,

    /// Maximum requests waiting for a slot before new ones are rejected.
    pub max_queue_length: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            max_queue_length: 100,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// How long in-flight requests may drain after a shutdown signal.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            shutdown_grace_secs: 30,
        }
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin listener.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8889".to_string(),
        }
    }
}
