//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! pipeline.rs, backend/, extension/
//!     → logging.rs (tracing subscriber, EnvFilter)
//!     → metrics.rs (counters and histograms, optional Prometheus listener)
//! ```
//!
//! # Design Decisions
//! - Request ID and sequence number travel on the pipeline span
//! - Metric updates are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
