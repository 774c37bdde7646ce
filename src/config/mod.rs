//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated, immutable)
//!     → [handler] table handed to the handler constructor as HandlerConfig
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a replica restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, ApiConfig, ConcurrencyConfig, LimitsConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, ProtocolMode, RuntimeConfig, TimeoutConfig,
};
pub use validation::{ValidationError, SUPPORTED_VERBS};
