//! TaskTree Telemetry - logging infrastructure
//!
//! Structured logging through `tracing`, plus a request span middleware.

pub mod middleware;
pub mod tracer;

pub use middleware::observability_middleware;
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
