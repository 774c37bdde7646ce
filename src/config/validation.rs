//! Configuration validation.
//!
//! Serde handles the syntax; this module checks the semantics. Every problem
//! is collected so an operator sees all of them at once.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{ProtocolMode, RuntimeConfig};

/// HTTP verbs a handler may declare.
pub const SUPPORTED_VERBS: [&str; 5] = ["POST", "GET", "PUT", "PATCH", "DELETE"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.api.name.trim().is_empty() {
        errors.push(ValidationError::new("api.name", "must not be empty"));
    }

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be at least 1"));
    }

    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if config.admin.enabled {
        check_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if config.concurrency.max_concurrency == 0 {
        errors.push(ValidationError::new("concurrency.max_concurrency", "must be at least 1"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be at least 1"));
    }
    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::new("limits.max_body_bytes", "must be at least 1"));
    }

    match config.api.protocol {
        ProtocolMode::Http => check_verbs(&mut errors, &config.api.accepted_verbs),
        ProtocolMode::Grpc => {
            if config.api.proto_path.as_deref().map_or(true, |p| p.trim().is_empty()) {
                errors.push(ValidationError::new(
                    "api.proto_path",
                    "required when protocol is grpc",
                ));
            }
        }
    }

    for (name, address) in &config.apis {
        match url::Url::parse(address) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError::new(
                format!("apis.{}", name),
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                format!("apis.{}", name),
                format!("invalid address '{}': {}", address, e),
            )),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a valid socket address", value),
        ));
    }
}

fn check_verbs(errors: &mut Vec<ValidationError>, verbs: &[String]) {
    if verbs.is_empty() {
        errors.push(ValidationError::new(
            "api.accepted_verbs",
            "at least one verb is required in http mode",
        ));
        return;
    }

    let mut seen = HashSet::new();
    for verb in verbs {
        let upper = verb.to_ascii_uppercase();
        if !SUPPORTED_VERBS.contains(&upper.as_str()) {
            errors.push(ValidationError::new(
                "api.accepted_verbs",
                format!("unsupported verb '{}'", verb),
            ));
        } else if !seen.insert(upper) {
            errors.push(ValidationError::new(
                "api.accepted_verbs",
                format!("duplicate verb '{}'", verb),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&RuntimeConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = RuntimeConfig::default();
        config.api.name = " ".into();
        config.listener.bind_address = "nowhere".into();
        config.concurrency.max_concurrency = 0;
        config.api.accepted_verbs = vec!["POST".into(), "post".into(), "HEAD".into()];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"api.name"));
        assert!(fields.contains(&"listener.bind_address"));
        assert!(fields.contains(&"concurrency.max_concurrency"));
        assert_eq!(fields.iter().filter(|f| **f == "api.accepted_verbs").count(), 2);
    }

    #[test]
    fn grpc_mode_requires_schema_path() {
        let mut config = RuntimeConfig::default();
        config.api.protocol = ProtocolMode::Grpc;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "api.proto_path");

        config.api.proto_path = Some("service.proto".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_non_http_chained_addresses() {
        let mut config = RuntimeConfig::default();
        config.apis.insert("tokenizer".into(), "ftp://tokenizer".into());
        config.apis.insert("ranker".into(), "http://ranker:8888".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "apis.tokenizer");
    }
}
