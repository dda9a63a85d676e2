//! Factories for validly signed commitments.

use arx_types::commitment::{
    Authenticator, Commitment, RequestId, SIGNATURE_ALGORITHM_SECP256K1,
};
use arx_types::hash::DataHash;
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;

/// Produces commitments signed with one secp256k1 key.
pub struct CommitmentFactory {
    key: SigningKey,
}

impl Default for CommitmentFactory {
    fn default() -> Self {
        Self::random()
    }
}

impl CommitmentFactory {
    pub fn random() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_key(key: SigningKey) -> Self {
        Self { key }
    }

    /// SEC1-compressed public key bytes (33 bytes).
    pub fn public_key(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// A fully valid commitment over arbitrary state and transaction
    /// bytes: consistent fingerprint, verifying signature.
    pub fn commitment(&self, state: &[u8], transaction: &[u8]) -> Commitment {
        let state_hash = DataHash::sha256(state);
        let transaction_hash = DataHash::sha256(transaction);
        self.commitment_for_hashes(state_hash, transaction_hash)
    }

    /// Same, from already-computed hashes.
    pub fn commitment_for_hashes(
        &self,
        state_hash: DataHash,
        transaction_hash: DataHash,
    ) -> Commitment {
        let public_key = self.public_key();
        let request_id = RequestId::compute(&public_key, &state_hash);

        let (signature, recovery) = self
            .key
            .sign_prehash_recoverable(transaction_hash.digest())
            .expect("prehash is 32 bytes");
        let mut sig_bytes = signature.to_bytes().to_vec();
        sig_bytes.push(recovery.to_byte());

        Commitment {
            request_id,
            transaction_hash,
            authenticator: Authenticator {
                algorithm: SIGNATURE_ALGORITHM_SECP256K1.to_string(),
                public_key,
                signature: sig_bytes,
                state_hash,
            },
        }
    }
}
