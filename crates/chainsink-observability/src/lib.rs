//! chainsink-observability — logging and metrics plumbing.
//!
//! Logging splits the sink into its two volume axes (ingest path vs
//! database round trips) with independent levels; metrics use OpenTelemetry
//! conventions and can be exported via OTLP. Both are optional for
//! embedders that bring their own subscriber or meter.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::SinkMetrics;
pub use tracing_setup::{init_tracing, LogConfig};
