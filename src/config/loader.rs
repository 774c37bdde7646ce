//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::RuntimeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from a TOML document.
pub fn parse_config(content: &str) -> Result<RuntimeConfig, ConfigError> {
    let config: RuntimeConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nname = \"iris\"\naccepted_verbs = [\"POST\", \"GET\"]").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.api.accepted_verbs.len(), 2);
    }

    #[test]
    fn validation_failures_are_reported_together() {
        let err = parse_config("[api]\nname = \"\"\n[concurrency]\nmax_concurrency = 0\n").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("api.name"));
        assert!(message.contains("concurrency.max_concurrency"));
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        assert!(matches!(parse_config("[api"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
