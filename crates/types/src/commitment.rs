//! Commitments, authenticators, and their stored record form.

use crate::hash::{DataHash, HashDecodeError};
use serde::{Deserialize, Serialize};

/// The signature algorithm every authenticator currently carries.
pub const SIGNATURE_ALGORITHM_SECP256K1: &str = "secp256k1";

/// Fingerprint of a commitment: the SHA-256 digest of the submitter's
/// public key followed by the state hash imprint. Doubles as the SMT path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub DataHash);

impl RequestId {
    /// Recomputes the fingerprint for a `(publicKey, stateHash)` pair.
    pub fn compute(public_key: &[u8], state_hash: &DataHash) -> Self {
        let imprint = state_hash.imprint();
        Self(DataHash::sha256_chunks([public_key, imprint.as_slice()]))
    }

    /// The 256-bit SMT path addressed by this fingerprint.
    pub fn to_path(&self) -> LeafPath {
        let mut bytes = [0u8; 32];
        for (dst, src) in bytes.iter_mut().zip(self.0.digest()) {
            *dst = *src;
        }
        LeafPath(bytes)
    }

    pub fn to_hex_imprint(&self) -> String {
        self.0.to_hex_imprint()
    }

    pub fn from_hex_imprint(s: &str) -> Result<Self, HashDecodeError> {
        DataHash::from_hex_imprint(s).map(Self)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A 256-bit SMT path, big-endian. The numeric value of a request
/// fingerprint's digest. Hex on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafPath(pub [u8; 32]);

impl serde::Serialize for LeafPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for LeafPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        LeafPath::from_slice(&bytes)
            .ok_or_else(|| serde::de::Error::custom("path must be 32 bytes"))
    }
}

impl LeafPath {
    /// The bit at `depth` (0 = most significant). Depths past 255 read as 0.
    pub fn bit(&self, depth: usize) -> bool {
        let byte = self.0.get(depth / 8).copied().unwrap_or(0);
        (byte >> (7 - (depth % 8))) & 1 == 1
    }

    /// Canonical 33-byte leaf-hash input encoding: a constant `0x01` tag
    /// byte followed by the big-endian path. The tag frames the hash
    /// input only; path values and tree traversal use the raw 256 bits.
    pub fn to_guarded_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        if let Some(first) = out.first_mut() {
            *first = 0x01;
        }
        for (dst, src) in out.iter_mut().skip(1).zip(self.0.iter()) {
            *dst = *src;
        }
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let mut out = [0u8; 32];
        if bytes.len() != 32 {
            return None;
        }
        for (dst, src) in out.iter_mut().zip(bytes) {
            *dst = *src;
        }
        Some(Self(out))
    }
}

/// Signature bundle proving the submitter authorizes a transaction hash
/// under the claimed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authenticator {
    /// Signature algorithm identifier; `"secp256k1"` today.
    pub algorithm: String,
    /// SEC1-compressed public key (33 bytes), hex on the wire.
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
    /// ECDSA signature `r ‖ s ‖ v` (65 bytes), hex on the wire.
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    /// The state hash the submitter claims to transition from.
    pub state_hash: DataHash,
}

impl Authenticator {
    /// The digest stored as the SMT leaf value for this authenticator and
    /// transaction hash: SHA-256 over the algorithm name, public key,
    /// signature, state hash imprint, and transaction hash imprint.
    pub fn leaf_value(&self, transaction_hash: &DataHash) -> DataHash {
        let state = self.state_hash.imprint();
        let tx = transaction_hash.imprint();
        DataHash::sha256_chunks([
            self.algorithm.as_bytes(),
            self.public_key.as_slice(),
            self.signature.as_slice(),
            state.as_slice(),
            tx.as_slice(),
        ])
    }
}

/// A client-submitted state-transition commitment, ephemeral until
/// validated and enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    pub request_id: RequestId,
    pub transaction_hash: DataHash,
    pub authenticator: Authenticator,
}

impl Commitment {
    /// The SMT leaf this commitment materializes as.
    pub fn to_leaf(&self) -> SmtLeaf {
        SmtLeaf {
            path: self.request_id.to_path(),
            value: self.authenticator.leaf_value(&self.transaction_hash),
        }
    }
}

/// The stored, canonical form of an accepted commitment. `sequence_id` is
/// assigned by the record store on first insert and defines canonical
/// insertion order within a block; it is absent on records that have not
/// been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorRecord {
    pub request_id: RequestId,
    pub transaction_hash: DataHash,
    pub authenticator: Authenticator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
}

impl From<Commitment> for AggregatorRecord {
    fn from(c: Commitment) -> Self {
        Self {
            request_id: c.request_id,
            transaction_hash: c.transaction_hash,
            authenticator: c.authenticator,
            sequence_id: None,
        }
    }
}

/// A leaf of the sparse Merkle tree: the request fingerprint's path and
/// the authenticator/transaction digest stored under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtLeaf {
    pub path: LeafPath,
    pub value: DataHash,
}

/// Outcome classification of commitment validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Success,
    RequestIdMismatch,
    AuthenticatorVerificationFailed,
    RequestIdExists,
}

/// A validation verdict plus whether a record already existed for the
/// fingerprint (idempotent replays report `SUCCESS` with `exists = true`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    pub exists: bool,
}

impl ValidationOutcome {
    pub fn ok(&self) -> bool {
        self.status == ValidationStatus::Success
    }
}
