//! Merkle paths and inclusion proofs.
//!
//! The digest rules here are the single definition of how the sparse
//! Merkle tree hashes; the engine builds trees with them and verifiers
//! replay them without any tree access.
//!
//! - An empty subtree digests to all zeroes.
//! - A subtree holding exactly one leaf digests to
//!   `SHA-256(0x00 ‖ guarded path ‖ value imprint)` regardless of depth.
//! - Any other subtree digests to `SHA-256(0x01 ‖ left ‖ right)`.

use arx_types::commitment::{Authenticator, LeafPath, RequestId};
use arx_types::hash::{DataHash, HashAlgorithm};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Digest of any empty subtree.
pub const EMPTY_SUBTREE_DIGEST: [u8; 32] = [0u8; 32];

const LEAF_DOMAIN: u8 = 0x00;
const BRANCH_DOMAIN: u8 = 0x01;

/// Digest of a subtree that holds exactly one leaf.
pub fn leaf_subtree_digest(path: &LeafPath, value: &DataHash) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_DOMAIN]);
    hasher.update(path.to_guarded_bytes());
    hasher.update(value.imprint());
    hasher.finalize().into()
}

/// Digest of an interior node from its children's digests.
pub fn branch_digest(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([BRANCH_DOMAIN]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Wraps a raw subtree digest as the tagged hash blocks carry.
pub fn digest_to_hash(digest: [u8; 32]) -> DataHash {
    // 32 bytes always satisfies the SHA-256 length check.
    DataHash::new(HashAlgorithm::Sha256, digest.to_vec())
        .unwrap_or_else(|_| DataHash::sha256(&digest))
}

/// A sibling digest along a Merkle path, hex on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiblingDigest(#[serde(with = "hex::serde")] pub [u8; 32]);

/// Where a Merkle path descent stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PathTerminal {
    /// A subtree holding exactly one leaf. Inclusion when its path equals
    /// the queried path; otherwise a valid proof that the queried path is
    /// absent.
    #[serde(rename_all = "camelCase")]
    Leaf { path: LeafPath, value: DataHash },
    /// An empty subtree on the queried path: the path is provably absent.
    Empty,
}

/// A verifiable Merkle path from the tree root to a terminal. Valid for
/// present and absent paths alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerklePath {
    /// The root this path anchors to.
    pub root: DataHash,
    /// Sibling digests, top-down; the digest at index `d` is the sibling
    /// of the queried path's subtree at depth `d`.
    pub steps: Vec<SiblingDigest>,
    pub terminal: PathTerminal,
}

/// Outcome of verifying a [`MerklePath`] against a queried path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathVerdict {
    /// The path recomputes to its claimed root.
    pub path_valid: bool,
    /// The path proves the queried leaf present (`false` with
    /// `path_valid = true` is a valid non-inclusion proof).
    pub included: bool,
}

impl MerklePath {
    /// Recomputes the root from the terminal upward, folding each sibling
    /// by the queried path's bit at that depth, and reports whether the
    /// path holds and whether it witnesses inclusion of `query`.
    pub fn verify(&self, query: &LeafPath) -> PathVerdict {
        let mut digest = match &self.terminal {
            PathTerminal::Leaf { path, value } => leaf_subtree_digest(path, value),
            PathTerminal::Empty => EMPTY_SUBTREE_DIGEST,
        };
        for (depth, sibling) in self.steps.iter().enumerate().rev() {
            digest = if query.bit(depth) {
                branch_digest(&sibling.0, &digest)
            } else {
                branch_digest(&digest, &sibling.0)
            };
        }
        let path_valid = self.root.algorithm() == HashAlgorithm::Sha256
            && self.root.digest() == digest.as_slice();
        let included = path_valid
            && matches!(&self.terminal, PathTerminal::Leaf { path, .. } if path == query);
        PathVerdict {
            path_valid,
            included,
        }
    }

    /// The leaf value this path terminates at, when it terminates at the
    /// queried leaf itself.
    pub fn leaf_value_for(&self, query: &LeafPath) -> Option<&DataHash> {
        match &self.terminal {
            PathTerminal::Leaf { path, value } if path == query => Some(value),
            _ => None,
        }
    }
}

/// The proof object served for `get_inclusion_proof`. For fingerprints the
/// aggregator never committed, `authenticator` and `transaction_hash` are
/// `null` and the path is a valid non-inclusion path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    pub merkle_tree_path: MerklePath,
    pub authenticator: Option<Authenticator>,
    pub transaction_hash: Option<DataHash>,
}

impl InclusionProof {
    /// Verifies the path against a request fingerprint.
    pub fn verify(&self, request_id: &RequestId) -> PathVerdict {
        self.merkle_tree_path.verify(&request_id.to_path())
    }
}
