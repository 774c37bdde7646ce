//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, one record per failed dispatch)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every failure record carries `error_kind` and `api`
//! - Request ID flows through request spans
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
