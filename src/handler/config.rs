//! Opaque handler configuration with fail-fast typed accessors.

use serde::de::DeserializeOwned;

use crate::error::HandlerError;

/// The `[handler]` table from the runtime config, handed unchanged to the
/// handler constructor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerConfig {
    table: toml::Table,
}

impl HandlerConfig {
    pub fn new(table: toml::Table) -> Self {
        Self { table }
    }

    /// Raw access to a value.
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.table.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    /// A string value that must be present.
    pub fn require_str(&self, key: &str) -> Result<&str, HandlerError> {
        match self.table.get(key) {
            Some(toml::Value::String(s)) => Ok(s),
            Some(other) => Err(wrong_type(key, "a string", other)),
            None => Err(missing(key)),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>, HandlerError> {
        match self.table.get(key) {
            Some(toml::Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(wrong_type(key, "a string", other)),
            None => Ok(None),
        }
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, HandlerError> {
        match self.table.get(key) {
            Some(toml::Value::Integer(i)) => Ok(Some(*i)),
            Some(other) => Err(wrong_type(key, "an integer", other)),
            None => Ok(None),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, HandlerError> {
        match self.table.get(key) {
            Some(toml::Value::Boolean(b)) => Ok(Some(*b)),
            Some(other) => Err(wrong_type(key, "a boolean", other)),
            None => Ok(None),
        }
    }

    /// Deserialize the whole table into a handler-defined settings struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        toml::Value::Table(self.table.clone())
            .try_into()
            .map_err(|e: toml::de::Error| HandlerError::from_error(format!("invalid handler config: {}", e), e))
    }

    pub fn as_table(&self) -> &toml::Table {
        &self.table
    }
}

impl From<toml::Table> for HandlerConfig {
    fn from(table: toml::Table) -> Self {
        Self::new(table)
    }
}

fn missing(key: &str) -> HandlerError {
    HandlerError::new(format!("handler config is missing required key '{}'", key))
}

fn wrong_type(key: &str, expected: &str, found: &toml::Value) -> HandlerError {
    HandlerError::new(format!(
        "handler config key '{}' must be {}, found {}",
        key,
        expected,
        found.type_str()
    ))
}
