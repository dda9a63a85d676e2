//! Prometheus metric registration and the global sink handle.
//!
//! Collectors live in `OnceCell`s initialized exactly once by
//! [`install_metrics`]. The sink degrades to a no-op when metrics were
//! never installed, so library tests run without a registry.

use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge,
};

static COMMITMENTS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static BLOCKS_PRODUCED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static BLOCK_HEIGHT: OnceCell<IntGauge> = OnceCell::new();
static ROUND_DURATION_SECONDS: OnceCell<Histogram> = OnceCell::new();
static IS_LEADER: OnceCell<IntGauge> = OnceCell::new();
static ACTIVE_REQUESTS: OnceCell<IntGauge> = OnceCell::new();
static RPC_REQUESTS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static RPC_REQUEST_DURATION_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static SYNC_EVENTS_APPLIED_TOTAL: OnceCell<IntCounter> = OnceCell::new();

/// Registers every collector with the default registry. Safe to call more
/// than once; later calls are no-ops.
pub fn install_metrics() {
    if let Ok(m) = register_int_counter!(
        "arx_commitments_total",
        "Commitments committed to blocks by this replica"
    ) {
        let _ = COMMITMENTS_TOTAL.set(m);
    }
    if let Ok(m) = register_int_counter!(
        "arx_blocks_produced_total",
        "Blocks produced by this replica"
    ) {
        let _ = BLOCKS_PRODUCED_TOTAL.set(m);
    }
    if let Ok(m) = register_int_gauge!("arx_block_height", "Newest block number seen") {
        let _ = BLOCK_HEIGHT.set(m);
    }
    if let Ok(buckets) = exponential_buckets(0.005, 2.0, 12) {
        if let Ok(m) = register_histogram!(
            "arx_round_duration_seconds",
            "Wall time of one block-production round",
            buckets
        ) {
            let _ = ROUND_DURATION_SECONDS.set(m);
        }
    }
    if let Ok(m) = register_int_gauge!("arx_is_leader", "1 while this replica holds the lease") {
        let _ = IS_LEADER.set(m);
    }
    if let Ok(m) = register_int_gauge!(
        "arx_active_requests",
        "Requests currently inside admission control"
    ) {
        let _ = ACTIVE_REQUESTS.set(m);
    }
    if let Ok(m) = register_int_counter_vec!(
        "arx_rpc_requests_total",
        "JSON-RPC requests by method and outcome",
        &["method", "result"]
    ) {
        let _ = RPC_REQUESTS_TOTAL.set(m);
    }
    if let Ok(buckets) = exponential_buckets(0.001, 2.0, 12) {
        if let Ok(m) = register_histogram_vec!(
            "arx_rpc_request_duration_seconds",
            "JSON-RPC request latency by method",
            &["method"],
            buckets
        ) {
            let _ = RPC_REQUEST_DURATION_SECONDS.set(m);
        }
    }
    if let Ok(m) = register_int_counter!(
        "arx_sync_events_applied_total",
        "Change-feed events applied by the follower synchronizer"
    ) {
        let _ = SYNC_EVENTS_APPLIED_TOTAL.set(m);
    }
}

/// The global sink handle. Methods are no-ops until [`install_metrics`]
/// ran.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorMetrics;

/// Accessor used across the workspace.
pub fn metrics() -> AggregatorMetrics {
    AggregatorMetrics
}

impl AggregatorMetrics {
    pub fn inc_commitments(&self, count: u64) {
        if let Some(m) = COMMITMENTS_TOTAL.get() {
            m.inc_by(count);
        }
    }

    pub fn inc_blocks_produced(&self) {
        if let Some(m) = BLOCKS_PRODUCED_TOTAL.get() {
            m.inc();
        }
    }

    pub fn set_block_height(&self, height: u64) {
        if let Some(m) = BLOCK_HEIGHT.get() {
            m.set(height as i64);
        }
    }

    pub fn observe_round_duration(&self, seconds: f64) {
        if let Some(m) = ROUND_DURATION_SECONDS.get() {
            m.observe(seconds);
        }
    }

    pub fn set_is_leader(&self, is_leader: bool) {
        if let Some(m) = IS_LEADER.get() {
            m.set(if is_leader { 1 } else { 0 });
        }
    }

    pub fn set_active_requests(&self, count: i64) {
        if let Some(m) = ACTIVE_REQUESTS.get() {
            m.set(count);
        }
    }

    pub fn inc_rpc_request(&self, method: &str, result: &str) {
        if let Some(m) = RPC_REQUESTS_TOTAL.get() {
            m.with_label_values(&[method, result]).inc();
        }
    }

    pub fn observe_rpc_duration(&self, method: &str, seconds: f64) {
        if let Some(m) = RPC_REQUEST_DURATION_SECONDS.get() {
            m.with_label_values(&[method]).observe(seconds);
        }
    }

    pub fn inc_sync_events(&self) {
        if let Some(m) = SYNC_EVENTS_APPLIED_TOTAL.get() {
            m.inc();
        }
    }
}
