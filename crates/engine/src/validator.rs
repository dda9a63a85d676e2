//! Commitment validation.
//!
//! Validation is pure with respect to record-store state at read time;
//! concurrent duplicates may both pass and both enqueue. The record
//! store's insert-if-absent resolves that race at block creation.

use arx_api::store::RecordStore;
use arx_types::commitment::{
    Authenticator, Commitment, RequestId, ValidationOutcome, ValidationStatus,
    SIGNATURE_ALGORITHM_SECP256K1,
};
use arx_types::error::StorageError;
use arx_types::hash::DataHash;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};
use std::sync::Arc;

/// Verifies an authenticator's ECDSA signature over the transaction hash
/// digest. The trailing recovery byte is carried on the wire but not
/// consulted here.
pub fn verify_authenticator(auth: &Authenticator, transaction_hash: &DataHash) -> bool {
    if auth.algorithm != SIGNATURE_ALGORITHM_SECP256K1 {
        return false;
    }
    let Ok(key) = VerifyingKey::from_sec1_bytes(&auth.public_key) else {
        return false;
    };
    let Some(sig_bytes) = auth.signature.get(..64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(sig_bytes) else {
        return false;
    };
    key.verify_prehash(transaction_hash.digest(), &signature)
        .is_ok()
}

/// Classifies submitted commitments against the record store.
pub struct CommitmentValidator {
    records: Arc<dyn RecordStore>,
}

impl CommitmentValidator {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    pub async fn validate(
        &self,
        commitment: &Commitment,
    ) -> Result<ValidationOutcome, StorageError> {
        let expected = RequestId::compute(
            &commitment.authenticator.public_key,
            &commitment.authenticator.state_hash,
        );
        if expected != commitment.request_id {
            return Ok(ValidationOutcome {
                status: ValidationStatus::RequestIdMismatch,
                exists: false,
            });
        }

        if !verify_authenticator(&commitment.authenticator, &commitment.transaction_hash) {
            return Ok(ValidationOutcome {
                status: ValidationStatus::AuthenticatorVerificationFailed,
                exists: false,
            });
        }

        match self.records.get(&commitment.request_id).await? {
            None => Ok(ValidationOutcome {
                status: ValidationStatus::Success,
                exists: false,
            }),
            Some(record) if record.transaction_hash == commitment.transaction_hash => {
                Ok(ValidationOutcome {
                    status: ValidationStatus::Success,
                    exists: true,
                })
            }
            Some(_) => Ok(ValidationOutcome {
                status: ValidationStatus::RequestIdExists,
                exists: true,
            }),
        }
    }
}
