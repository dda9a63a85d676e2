//! Signed acknowledgment receipts for accepted commitments.

use arx_types::commitment::{Commitment, RequestId, SIGNATURE_ALGORITHM_SECP256K1};
use arx_types::hash::DataHash;
use k256::ecdsa::SigningKey;
use serde::Serialize;

const RECEIPT_SERVICE: &str = "aggregator";
const RECEIPT_METHOD: &str = "submit_commitment";

/// The acknowledged request, bound together by its own digest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRequest {
    pub service: String,
    pub method: String,
    pub request_id: RequestId,
    pub state_hash: DataHash,
    pub transaction_hash: DataHash,
    /// Digest over the fields above; the signature covers this.
    pub hash: DataHash,
}

/// A signed acknowledgment returned from `submit_commitment` on request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedReceipt {
    pub request: ReceiptRequest,
    pub algorithm: String,
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

/// Signs receipts with the node's anchor key.
#[derive(Clone)]
pub struct ReceiptSigner {
    key: SigningKey,
}

impl ReceiptSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn sign(&self, commitment: &Commitment) -> Result<SignedReceipt, k256::ecdsa::Error> {
        let request_imprint = commitment.request_id.0.imprint();
        let state_imprint = commitment.authenticator.state_hash.imprint();
        let tx_imprint = commitment.transaction_hash.imprint();
        let hash = DataHash::sha256_chunks([
            RECEIPT_SERVICE.as_bytes(),
            RECEIPT_METHOD.as_bytes(),
            request_imprint.as_slice(),
            state_imprint.as_slice(),
            tx_imprint.as_slice(),
        ]);

        let (signature, recovery) = self.key.sign_prehash_recoverable(hash.digest())?;
        let mut sig_bytes = signature.to_bytes().to_vec();
        sig_bytes.push(recovery.to_byte());

        Ok(SignedReceipt {
            request: ReceiptRequest {
                service: RECEIPT_SERVICE.to_string(),
                method: RECEIPT_METHOD.to_string(),
                request_id: commitment.request_id.clone(),
                state_hash: commitment.authenticator.state_hash.clone(),
                transaction_hash: commitment.transaction_hash.clone(),
                hash,
            },
            algorithm: SIGNATURE_ALGORITHM_SECP256K1.to_string(),
            public_key: self
                .key
                .verifying_key()
                .to_encoded_point(true)
                .as_bytes()
                .to_vec(),
            signature: sig_bytes,
        })
    }
}
