#![forbid(unsafe_code)]

//! # Arx gateway
//!
//! The HTTP surface of a replica: JSON-RPC 2.0 on `POST /`, liveness on
//! `GET /health`, Prometheus text on `GET /metrics`. Admission control on
//! the RPC route is a tower stack: a concurrency limit, a load-shed layer
//! that rejects instead of queueing, and a request timeout, made
//! infallible by `HandleErrorLayer`. Shed load surfaces as 503 with
//! JSON-RPC error `-32000` before it reaches the engine.

mod receipt;
mod rpc;
#[cfg(test)]
mod tests;

pub use receipt::ReceiptSigner;

use arx_api::rpc::AggregatorApi;
use axum::{
    body::Body,
    error_handling::HandleErrorLayer,
    extract::State,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::{
    limit::ConcurrencyLimitLayer, load_shed::LoadShedLayer, timeout::TimeoutLayer, BoxError,
    ServiceBuilder,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

pub(crate) const CAPACITY_MESSAGE: &str = "Server is at capacity. Please try again later.";

/// Gateway tuning.
pub struct GatewayConfig {
    pub port: u16,
    /// Maximum concurrently admitted requests on `POST /`.
    pub concurrency_limit: usize,
    /// Request body cap in kilobytes.
    pub body_limit_kb: usize,
    /// Upper bound on one RPC request.
    pub request_timeout: Duration,
    /// Signs acknowledgment receipts when present.
    pub receipt_signer: Option<ReceiptSigner>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 80,
            concurrency_limit: 100,
            body_limit_kb: 1024,
            request_timeout: Duration::from_secs(30),
            receipt_signer: None,
        }
    }
}

pub(crate) struct GatewayState {
    pub(crate) api: Arc<dyn AggregatorApi>,
    pub(crate) receipt_signer: Option<ReceiptSigner>,
    pub(crate) active_requests: AtomicI64,
    pub(crate) max_concurrent: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    role: &'static str,
    server_id: String,
    smt_root_hash: String,
    active_requests: i64,
    max_concurrent_requests: i64,
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    let health = state.api.health().await;
    Json(HealthResponse {
        role: health.role.as_str(),
        server_id: health.server_id,
        smt_root_hash: health.smt_root_hash.to_hex_imprint(),
        active_requests: state.active_requests.load(Ordering::SeqCst),
        max_concurrent_requests: state.max_concurrent,
    })
}

async fn metrics_handler() -> ([(axum::http::HeaderName, String); 1], axum::body::Bytes) {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::with_capacity(1 << 16);
    if let Err(e) = encoder.encode(&metric_families, &mut buf) {
        tracing::error!(target: "gateway", error = %e, "failed to encode metrics");
    }
    (
        [(
            axum::http::header::CONTENT_TYPE,
            encoder.format_type().to_string(),
        )],
        buf.into(),
    )
}

/// Pure instrumentation around the RPC route: counts a request in and out
/// so `/health` can report it. The layer sits outside the shedding stack,
/// so a rejected request is counted while its 503 is in flight.
async fn track_active_requests(
    State(state): State<Arc<GatewayState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let active = state.active_requests.fetch_add(1, Ordering::SeqCst) + 1;
    arx_telemetry::metrics().set_active_requests(active);

    let response = next.run(req).await;

    let now = state.active_requests.fetch_sub(1, Ordering::SeqCst) - 1;
    arx_telemetry::metrics().set_active_requests(now);
    response
}

/// Maps errors from the fallible middleware layers to structured JSON-RPC
/// responses, making the stack infallible for the router.
async fn map_middleware_error(err: BoxError) -> Response {
    if err.is::<tower::load_shed::error::Overloaded>() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(rpc::capacity_error_body()),
        )
            .into_response()
    } else if err.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            Json(rpc::transport_error_body(
                rpc::REQUEST_TIMED_OUT,
                "request timed out",
            )),
        )
            .into_response()
    } else {
        tracing::error!(target: "gateway", error = %err, "middleware failure");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(rpc::transport_error_body(
                rpc::INTERNAL_ERROR,
                "internal error",
            )),
        )
            .into_response()
    }
}

/// Builds the router; separated from [`run_server`] so tests can drive it
/// without a socket.
pub fn router(api: Arc<dyn AggregatorApi>, config: &GatewayConfig) -> Router {
    let state = Arc::new(GatewayState {
        api,
        receipt_signer: config.receipt_signer.clone(),
        active_requests: AtomicI64::new(0),
        max_concurrent: config.concurrency_limit as i64,
    });

    Router::new()
        .route("/", post(rpc::rpc_handler))
        // Admission applies to the RPC surface only; health and metrics
        // must stay reachable at capacity. `HandleErrorLayer` wraps the
        // fallible layers so the stack is infallible; load-shed turns a
        // full concurrency limit into an immediate rejection instead of a
        // queue.
        .route_layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    track_active_requests,
                ))
                .layer(HandleErrorLayer::new(map_middleware_error))
                .layer(LoadShedLayer::new())
                .layer(ConcurrencyLimitLayer::new(config.concurrency_limit))
                .layer(TimeoutLayer::new(config.request_timeout)),
        )
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(config.body_limit_kb * 1024)),
        )
}

/// Serves until the shutdown channel flips.
pub async fn run_server(
    config: GatewayConfig,
    api: Arc<dyn AggregatorApi>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = router(api, &config);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "gateway", %addr, "JSON-RPC gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!(target: "gateway", "shutting down gracefully");
        })
        .await
}
