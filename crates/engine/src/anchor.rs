//! Trust-anchor clients.
//!
//! The aggregator treats the anchor ledger as a black box behind
//! [`TrustAnchorClient`]: it returns a proof, the previously witnessed
//! root, and the ledger's notion of time. Two implementations exist: the
//! real HTTP client and an in-process mock with the same chaining
//! semantics for tests and anchor-less deployments.

use arx_api::anchor::{AnchorReceipt, TrustAnchorClient};
use arx_types::error::AnchorError;
use arx_types::hash::DataHash;
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Immediate anchor with synthesized previous-root chaining and local
/// timestamps.
#[derive(Default)]
pub struct MockAnchorClient {
    last_root: Mutex<Option<DataHash>>,
}

impl MockAnchorClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustAnchorClient for MockAnchorClient {
    async fn submit_root_hash(&self, root: &DataHash) -> Result<AnchorReceipt, AnchorError> {
        let previous = {
            let mut last = self
                .last_root
                .lock()
                .map_err(|_| AnchorError::Transient("mock anchor poisoned".into()))?;
            last.replace(root.clone())
        };
        let proof: [u8; 32] = Sha256::new()
            .chain_update(b"anchored:")
            .chain_update(root.imprint())
            .finalize()
            .into();
        Ok(AnchorReceipt {
            proof: proof.to_vec(),
            previous_root_witness: previous,
            timestamp: now_millis(),
        })
    }
}

#[derive(Serialize)]
struct SubmitRootRequest<'a> {
    root_hash: String,
    signature: String,
    public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    network_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    partition_id: Option<u64>,
}

#[derive(Deserialize)]
struct SubmitRootResponse {
    proof: String,
    previous_root: Option<String>,
    timestamp: u64,
}

/// The real ledger client. Slow by nature; the round manager calls it once
/// per round and re-submits the same root after a failed round.
pub struct HttpAnchorClient {
    client: reqwest::Client,
    url: String,
    key: SigningKey,
    network_id: Option<String>,
    partition_id: Option<u64>,
}

impl HttpAnchorClient {
    pub fn new(
        url: String,
        key: SigningKey,
        network_id: Option<String>,
        partition_id: Option<u64>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url,
            key,
            network_id,
            partition_id,
        }
    }
}

#[async_trait]
impl TrustAnchorClient for HttpAnchorClient {
    async fn submit_root_hash(&self, root: &DataHash) -> Result<AnchorReceipt, AnchorError> {
        let (signature, recovery) = self
            .key
            .sign_prehash_recoverable(root.digest())
            .map_err(|e| AnchorError::Rejected(format!("signing failed: {e}")))?;
        let mut sig_bytes = signature.to_bytes().to_vec();
        sig_bytes.push(recovery.to_byte());

        let request = SubmitRootRequest {
            root_hash: root.to_hex_imprint(),
            signature: hex::encode(sig_bytes),
            public_key: hex::encode(
                self.key.verifying_key().to_encoded_point(true).as_bytes(),
            ),
            network_id: self.network_id.as_deref(),
            partition_id: self.partition_id,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnchorError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AnchorError::Transient(format!("anchor returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnchorError::Rejected(format!("{status}: {body}")));
        }

        let body: SubmitRootResponse = response
            .json()
            .await
            .map_err(|e| AnchorError::Transient(format!("malformed anchor response: {e}")))?;
        let proof = hex::decode(&body.proof)
            .map_err(|e| AnchorError::Rejected(format!("malformed proof: {e}")))?;
        let previous_root_witness = body
            .previous_root
            .as_deref()
            .map(DataHash::from_hex_imprint)
            .transpose()
            .map_err(|e| AnchorError::Rejected(format!("malformed previous root: {e}")))?;

        Ok(AnchorReceipt {
            proof,
            previous_root_witness,
            timestamp: body.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_chains_previous_roots() {
        let anchor = MockAnchorClient::new();
        let a = DataHash::sha256(b"root-a");
        let b = DataHash::sha256(b"root-b");

        let first = anchor.submit_root_hash(&a).await.unwrap();
        assert_eq!(first.previous_root_witness, None);
        assert!(first.timestamp > 0);

        let second = anchor.submit_root_hash(&b).await.unwrap();
        assert_eq!(second.previous_root_witness, Some(a));
        assert_ne!(first.proof, second.proof);
    }

    #[tokio::test]
    async fn resubmitting_the_same_root_witnesses_it() {
        // A failed round retries with the same root; the witness then
        // equals the submitted root itself.
        let anchor = MockAnchorClient::new();
        let a = DataHash::sha256(b"root");
        anchor.submit_root_hash(&a).await.unwrap();
        let again = anchor.submit_root_hash(&a).await.unwrap();
        assert_eq!(again.previous_root_witness, Some(a));
    }
}
