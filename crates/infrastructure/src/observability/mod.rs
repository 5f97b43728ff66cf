//! Observability module
//!
//! Structured logging helpers and `metrics` facade recorders. Installing a
//! subscriber or exporter is left to the binary.

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::MetricsCollector;
pub use structured_logger::StructuredLogger;
