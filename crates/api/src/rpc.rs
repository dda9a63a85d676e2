//! The aggregator's request-facing surface.
//!
//! The gateway speaks JSON-RPC; everything behind the framing goes through
//! this trait so the gateway can be tested against a mock aggregator.

use crate::proof::InclusionProof;
use arx_types::block::{Block, BlockQuery};
use arx_types::cluster::ReplicaRole;
use arx_types::commitment::{AggregatorRecord, Commitment, RequestId, ValidationOutcome};
use arx_types::error::StorageError;
use arx_types::hash::DataHash;
use async_trait::async_trait;

/// Role and tree state reported by `/health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHealth {
    pub role: ReplicaRole,
    pub server_id: String,
    pub smt_root_hash: DataHash,
}

/// Everything a replica answers for clients, leader and follower alike.
#[async_trait]
pub trait AggregatorApi: Send + Sync {
    /// Validates and durably enqueues a commitment. A non-`SUCCESS` status
    /// is a client error, not a failure.
    async fn submit_commitment(
        &self,
        commitment: Commitment,
    ) -> Result<ValidationOutcome, StorageError>;

    /// A Merkle path for the fingerprint against the current tree, plus
    /// the stored record's authenticator and transaction hash when one
    /// exists.
    async fn inclusion_proof(
        &self,
        request_id: &RequestId,
    ) -> Result<InclusionProof, StorageError>;

    /// The newest block number, or 0 when no block exists yet.
    async fn block_height(&self) -> Result<u64, StorageError>;

    async fn block(&self, query: BlockQuery) -> Result<Option<Block>, StorageError>;

    /// The records committed in a block, or `None` when the block does not
    /// exist. An empty block yields an empty list.
    async fn block_commitments(
        &self,
        block_number: u64,
    ) -> Result<Option<Vec<AggregatorRecord>>, StorageError>;

    async fn health(&self) -> NodeHealth;
}
