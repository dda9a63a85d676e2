//! Gateway behavior tests driven through the router, no sockets.

use crate::{router, GatewayConfig, ReceiptSigner};
use arx_api::proof::{InclusionProof, MerklePath, PathTerminal};
use arx_api::rpc::{AggregatorApi, NodeHealth};
use arx_test_utils::CommitmentFactory;
use arx_types::block::{Block, BlockQuery};
use arx_types::cluster::ReplicaRole;
use arx_types::commitment::{
    AggregatorRecord, Commitment, RequestId, ValidationOutcome, ValidationStatus,
};
use arx_types::error::StorageError;
use arx_types::hash::DataHash;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tower::ServiceExt;

struct MockApi {
    submit_gate: Option<(mpsc::UnboundedSender<()>, Arc<Semaphore>)>,
}

impl MockApi {
    fn plain() -> Self {
        Self { submit_gate: None }
    }
}

fn sample_block() -> Block {
    Block {
        index: 1,
        chain_id: 1,
        version: 1,
        fork_id: 1,
        timestamp: 1_700_000_000_000,
        anchor_proof: vec![0xab, 0xcd],
        previous_block_hash: DataHash::sha256(b"prev"),
        root_hash: DataHash::sha256(b"root"),
        no_deletion_proof_hash: None,
    }
}

#[async_trait]
impl AggregatorApi for MockApi {
    async fn submit_commitment(
        &self,
        _commitment: Commitment,
    ) -> Result<ValidationOutcome, StorageError> {
        if let Some((entered, gate)) = &self.submit_gate {
            let _ = entered.send(());
            let _permit = gate.acquire().await;
        }
        Ok(ValidationOutcome {
            status: ValidationStatus::Success,
            exists: false,
        })
    }

    async fn inclusion_proof(
        &self,
        _request_id: &RequestId,
    ) -> Result<InclusionProof, StorageError> {
        Ok(InclusionProof {
            merkle_tree_path: MerklePath {
                root: DataHash::sha256(b"root"),
                steps: vec![],
                terminal: PathTerminal::Empty,
            },
            authenticator: None,
            transaction_hash: None,
        })
    }

    async fn block_height(&self) -> Result<u64, StorageError> {
        Ok(3)
    }

    async fn block(&self, query: BlockQuery) -> Result<Option<Block>, StorageError> {
        Ok(match query {
            BlockQuery::Number(1) | BlockQuery::Latest => Some(sample_block()),
            _ => None,
        })
    }

    async fn block_commitments(
        &self,
        block_number: u64,
    ) -> Result<Option<Vec<AggregatorRecord>>, StorageError> {
        Ok((block_number == 1).then(Vec::new))
    }

    async fn health(&self) -> NodeHealth {
        NodeHealth {
            role: ReplicaRole::Follower,
            server_id: "mock".into(),
            smt_root_hash: DataHash::sha256(b"root"),
        }
    }
}

fn rpc_request(method: &str, params: Value) -> Request<Body> {
    let body = json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 1 });
    Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn test_router(api: MockApi, config: GatewayConfig) -> axum::Router {
    router(Arc::new(api), &config)
}

#[tokio::test]
async fn block_height_is_a_decimal_string() {
    let app = test_router(MockApi::plain(), GatewayConfig::default());
    let response = app
        .oneshot(rpc_request("get_block_height", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["result"]["blockNumber"], "3");
    assert_eq!(body["id"], 1);
}

#[tokio::test]
async fn get_block_by_number_and_latest() {
    let app = test_router(MockApi::plain(), GatewayConfig::default());
    for param in [json!("1"), json!("latest"), json!(1)] {
        let response = app
            .clone()
            .oneshot(rpc_request("get_block", json!({ "blockNumber": param })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["result"]["index"], 1);
        assert!(body["result"]["rootHash"].is_string());
        assert_eq!(body["result"]["noDeletionProofHash"], Value::Null);
    }
}

#[tokio::test]
async fn missing_block_is_404() {
    let app = test_router(MockApi::plain(), GatewayConfig::default());
    let response = app
        .oneshot(rpc_request("get_block", json!({ "blockNumber": "42" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], -32001);
}

#[tokio::test]
async fn malformed_block_number_is_invalid_params() {
    let app = test_router(MockApi::plain(), GatewayConfig::default());
    for param in [json!("soon"), json!("0"), json!(true)] {
        let response = app
            .clone()
            .oneshot(rpc_request("get_block", json!({ "blockNumber": param })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert_eq!(body["error"]["code"], -32602);
    }
}

#[tokio::test]
async fn empty_block_commitments_is_an_empty_array() {
    let app = test_router(MockApi::plain(), GatewayConfig::default());
    let response = app
        .oneshot(rpc_request(
            "get_block_commitments",
            json!({ "blockNumber": "1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["result"], json!([]));
}

#[tokio::test]
async fn unknown_method_and_unparsable_body() {
    let app = test_router(MockApi::plain(), GatewayConfig::default());

    let response = app
        .clone()
        .oneshot(rpc_request("get_everything", json!({})))
        .await
        .unwrap();
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], -32601);

    let broken = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(broken).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn no_deletion_proof_is_not_implemented() {
    let app = test_router(MockApi::plain(), GatewayConfig::default());
    let response = app
        .oneshot(rpc_request("get_no_deletion_proof", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], -32603);
}

#[tokio::test]
async fn submit_returns_status_and_signed_receipt() {
    let signer_key = SigningKey::random(&mut rand::rngs::OsRng);
    let verifying = *signer_key.verifying_key();
    let config = GatewayConfig {
        receipt_signer: Some(ReceiptSigner::new(signer_key)),
        ..GatewayConfig::default()
    };
    let app = test_router(MockApi::plain(), config);

    let c = CommitmentFactory::random().commitment(b"state", b"tx");
    let response = app
        .oneshot(rpc_request(
            "submit_commitment",
            json!({
                "requestId": c.request_id,
                "transactionHash": c.transaction_hash,
                "authenticator": c.authenticator,
                "receipt": true,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["result"]["status"], "SUCCESS");

    let receipt = &body["result"]["receipt"];
    assert_eq!(receipt["algorithm"], "secp256k1");
    assert_eq!(receipt["request"]["service"], "aggregator");
    assert_eq!(receipt["request"]["method"], "submit_commitment");
    assert_eq!(
        receipt["request"]["requestId"],
        json!(c.request_id.to_hex_imprint())
    );

    // The signature verifies over the receipt hash under the node key.
    let hash = DataHash::from_hex_imprint(receipt["request"]["hash"].as_str().unwrap()).unwrap();
    let sig_bytes = hex::decode(receipt["signature"].as_str().unwrap()).unwrap();
    let signature = Signature::from_slice(&sig_bytes[..64]).unwrap();
    let public_key =
        VerifyingKey::from_sec1_bytes(&hex::decode(receipt["publicKey"].as_str().unwrap()).unwrap())
            .unwrap();
    assert_eq!(public_key, verifying);
    public_key.verify_prehash(hash.digest(), &signature).unwrap();
}

#[tokio::test]
async fn capacity_overflow_is_shed_with_rpc_error() {
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let gate = Arc::new(Semaphore::new(0));
    let api = MockApi {
        submit_gate: Some((entered_tx, gate.clone())),
    };
    let config = GatewayConfig {
        concurrency_limit: 1,
        ..GatewayConfig::default()
    };
    let app = test_router(api, config);

    let c = CommitmentFactory::random().commitment(b"state", b"tx");
    let submit_params = json!({
        "requestId": c.request_id,
        "transactionHash": c.transaction_hash,
        "authenticator": c.authenticator,
    });

    // First request parks inside the engine, holding its admission slot.
    let held = tokio::spawn(
        app.clone()
            .oneshot(rpc_request("submit_commitment", submit_params.clone())),
    );
    entered_rx.recv().await.unwrap();

    // Health stays reachable and reports the held request.
    let health = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let health_body = response_json(health).await;
    assert_eq!(health_body["activeRequests"], 1);
    assert_eq!(health_body["maxConcurrentRequests"], 1);
    assert_eq!(health_body["role"], "follower");

    // Second request is shed.
    let shed = app
        .clone()
        .oneshot(rpc_request("submit_commitment", submit_params))
        .await
        .unwrap();
    assert_eq!(shed.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = response_json(shed).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(
        body["error"]["message"],
        "Server is at capacity. Please try again later."
    );

    // Release the held request; the counter returns to zero.
    gate.add_permits(1);
    let response = held.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let health_body = response_json(health).await;
    assert_eq!(health_body["activeRequests"], 0);
}
