//! JSON-RPC 2.0 framing and method dispatch.

use crate::GatewayState;
use arx_types::block::BlockQuery;
use arx_types::commitment::{Authenticator, Commitment, RequestId, ValidationStatus};
use arx_types::hash::DataHash;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

pub(crate) const PARSE_ERROR: i64 = -32700;
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;
pub(crate) const INVALID_PARAMS: i64 = -32602;
pub(crate) const INTERNAL_ERROR: i64 = -32603;
pub(crate) const SERVER_AT_CAPACITY: i64 = -32000;
pub(crate) const NOT_FOUND: i64 = -32001;
pub(crate) const REQUEST_TIMED_OUT: i64 = -32002;

#[derive(Deserialize)]
pub(crate) struct RpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

fn rpc_result(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "result": result, "id": id })
}

fn rpc_error(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": id,
    })
}

/// Error body for failures raised by the middleware stack, before any
/// request id is known.
pub(crate) fn transport_error_body(code: i64, message: &str) -> Value {
    rpc_error(&Value::Null, code, message)
}

/// The body paired with the load-shed layer's 503.
pub(crate) fn capacity_error_body() -> Value {
    transport_error_body(SERVER_AT_CAPACITY, crate::CAPACITY_MESSAGE)
}

fn http_status_for(code: i64) -> StatusCode {
    match code {
        INVALID_PARAMS | PARSE_ERROR => StatusCode::BAD_REQUEST,
        NOT_FOUND => StatusCode::NOT_FOUND,
        SERVER_AT_CAPACITY => StatusCode::SERVICE_UNAVAILABLE,
        INTERNAL_ERROR => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    }
}

enum Reply {
    Result(Value),
    Error { code: i64, message: String },
}

impl Reply {
    fn error(code: i64, message: impl Into<String>) -> Self {
        Reply::Error {
            code,
            message: message.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitParams {
    request_id: RequestId,
    transaction_hash: DataHash,
    authenticator: Authenticator,
    #[serde(default)]
    receipt: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestIdParams {
    request_id: RequestId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockNumberParams {
    block_number: Value,
}

fn parse_block_query(raw: &Value) -> Option<BlockQuery> {
    match raw {
        Value::String(s) => BlockQuery::parse(s),
        Value::Number(n) => n.as_u64().filter(|v| *v > 0).map(BlockQuery::Number),
        _ => None,
    }
}

pub(crate) async fn rpc_handler(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<RpcRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            let body = rpc_error(&Value::Null, PARSE_ERROR, &rejection.body_text());
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let started = Instant::now();
    let method = request.method.clone();
    let id = request.id.clone();
    let reply = dispatch(&state, request).await;

    let metrics = arx_telemetry::metrics();
    metrics.observe_rpc_duration(&method, started.elapsed().as_secs_f64());
    let (status, body) = match reply {
        Reply::Result(result) => {
            metrics.inc_rpc_request(&method, "ok");
            (StatusCode::OK, rpc_result(&id, result))
        }
        Reply::Error { code, message } => {
            metrics.inc_rpc_request(&method, "error");
            (http_status_for(code), rpc_error(&id, code, &message))
        }
    };
    (status, Json(body)).into_response()
}

async fn dispatch(state: &GatewayState, request: RpcRequest) -> Reply {
    match request.method.as_str() {
        "submit_commitment" => submit_commitment(state, request.params).await,
        "get_inclusion_proof" => get_inclusion_proof(state, request.params).await,
        "get_block_height" => get_block_height(state).await,
        "get_block" => get_block(state, request.params).await,
        "get_block_commitments" => get_block_commitments(state, request.params).await,
        "get_no_deletion_proof" => Reply::error(INTERNAL_ERROR, "not implemented"),
        other => Reply::error(METHOD_NOT_FOUND, format!("unknown method {other}")),
    }
}

async fn submit_commitment(state: &GatewayState, params: Value) -> Reply {
    let params: SubmitParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return Reply::error(INVALID_PARAMS, e.to_string()),
    };
    let commitment = Commitment {
        request_id: params.request_id,
        transaction_hash: params.transaction_hash,
        authenticator: params.authenticator,
    };

    let outcome = match state.api.submit_commitment(commitment.clone()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(target: "gateway", error = %e, "submit_commitment failed");
            return Reply::error(INTERNAL_ERROR, "internal error");
        }
    };

    let mut result = json!({ "status": outcome.status });
    if params.receipt && outcome.status == ValidationStatus::Success {
        if let Some(signer) = &state.receipt_signer {
            match signer.sign(&commitment) {
                Ok(receipt) => {
                    if let Ok(value) = serde_json::to_value(receipt) {
                        result["receipt"] = value;
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "gateway", error = %e, "receipt signing failed");
                }
            }
        }
    }
    Reply::Result(result)
}

async fn get_inclusion_proof(state: &GatewayState, params: Value) -> Reply {
    let params: RequestIdParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return Reply::error(INVALID_PARAMS, e.to_string()),
    };
    match state.api.inclusion_proof(&params.request_id).await {
        Ok(proof) => match serde_json::to_value(proof) {
            Ok(value) => Reply::Result(value),
            Err(e) => Reply::error(INTERNAL_ERROR, e.to_string()),
        },
        Err(e) => {
            tracing::error!(target: "gateway", error = %e, "get_inclusion_proof failed");
            Reply::error(INTERNAL_ERROR, "internal error")
        }
    }
}

async fn get_block_height(state: &GatewayState) -> Reply {
    match state.api.block_height().await {
        Ok(height) => Reply::Result(json!({ "blockNumber": height.to_string() })),
        Err(e) => {
            tracing::error!(target: "gateway", error = %e, "get_block_height failed");
            Reply::error(INTERNAL_ERROR, "internal error")
        }
    }
}

async fn get_block(state: &GatewayState, params: Value) -> Reply {
    let params: BlockNumberParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return Reply::error(INVALID_PARAMS, e.to_string()),
    };
    let Some(query) = parse_block_query(&params.block_number) else {
        return Reply::error(INVALID_PARAMS, "blockNumber must be a positive integer or \"latest\"");
    };
    match state.api.block(query).await {
        Ok(Some(block)) => match serde_json::to_value(block) {
            Ok(value) => Reply::Result(value),
            Err(e) => Reply::error(INTERNAL_ERROR, e.to_string()),
        },
        Ok(None) => Reply::error(NOT_FOUND, "block not found"),
        Err(e) => {
            tracing::error!(target: "gateway", error = %e, "get_block failed");
            Reply::error(INTERNAL_ERROR, "internal error")
        }
    }
}

async fn get_block_commitments(state: &GatewayState, params: Value) -> Reply {
    let params: BlockNumberParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return Reply::error(INVALID_PARAMS, e.to_string()),
    };
    let Some(BlockQuery::Number(block_number)) = parse_block_query(&params.block_number) else {
        return Reply::error(INVALID_PARAMS, "blockNumber must be a positive integer");
    };
    match state.api.block_commitments(block_number).await {
        Ok(Some(records)) => match serde_json::to_value(records) {
            Ok(value) => Reply::Result(value),
            Err(e) => Reply::error(INTERNAL_ERROR, e.to_string()),
        },
        Ok(None) => Reply::error(NOT_FOUND, "block not found"),
        Err(e) => {
            tracing::error!(target: "gateway", error = %e, "get_block_commitments failed");
            Reply::error(INTERNAL_ERROR, "internal error")
        }
    }
}
