//! Blocks and per-block record lists.

use crate::commitment::RequestId;
use crate::hash::DataHash;
use serde::{Deserialize, Serialize};

/// A sealed unit of the hash chain: the SMT root after a round, the
/// external anchor proof, and the previous block's witnessed root. Blocks
/// never mutate once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Gap-free sequence starting at 1.
    pub index: u64,
    pub chain_id: u64,
    pub version: u64,
    pub fork_id: u64,
    /// Milliseconds since epoch, taken verbatim from the anchor response.
    pub timestamp: u64,
    /// Opaque proof bytes returned by the trust anchor, hex on the wire.
    #[serde(with = "hex::serde")]
    pub anchor_proof: Vec<u8>,
    /// For block 1 the configured initial block hash; otherwise the anchor's
    /// witness of the previously submitted root.
    pub previous_block_hash: DataHash,
    /// The SMT root this block seals.
    pub root_hash: DataHash,
    /// Reserved; always `null` today.
    pub no_deletion_proof_hash: Option<DataHash>,
}

/// The ordered list of request fingerprints newly admitted during a round.
/// One per block; may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecords {
    pub block_number: u64,
    pub request_ids: Vec<RequestId>,
}

/// Block lookup: by index, or whatever is newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockQuery {
    Number(u64),
    Latest,
}

impl BlockQuery {
    /// Parses the wire form: a base-10 block number or the literal
    /// `"latest"`.
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("latest") {
            return Some(BlockQuery::Latest);
        }
        s.parse::<u64>().ok().filter(|n| *n > 0).map(BlockQuery::Number)
    }
}
