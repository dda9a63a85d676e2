#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]

//! # Arx telemetry
//!
//! Observability infrastructure: structured logging initialization and the
//! Prometheus counters the engine, cluster, and gateway report into.

/// The initialization routine for global structured logging.
pub mod init;
/// Prometheus metric registration and the global sink handle.
pub mod metrics;

pub use init::init_tracing;
pub use metrics::{install_metrics, metrics, AggregatorMetrics};
