//! The request-facing aggregator surface.
//!
//! Thin composition over the validator, the round manager's queue, the
//! tree, and the block store. Leader and follower replicas answer the
//! same read surface; only block production differs.

use crate::validator::CommitmentValidator;
use arx_api::proof::InclusionProof;
use arx_api::rpc::{AggregatorApi, NodeHealth};
use arx_api::store::{BlockStore, RecordStore};
use arx_smt::SparseMerkleTree;
use arx_types::block::{Block, BlockQuery};
use arx_types::cluster::ReplicaRole;
use arx_types::commitment::{AggregatorRecord, Commitment, RequestId, ValidationOutcome};
use arx_types::error::StorageError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use crate::round::RoundManager;

pub struct Aggregator {
    validator: CommitmentValidator,
    round: Arc<RoundManager>,
    records: Arc<dyn RecordStore>,
    blocks: Arc<dyn BlockStore>,
    smt: Arc<RwLock<SparseMerkleTree>>,
    role_rx: watch::Receiver<ReplicaRole>,
    server_id: String,
}

impl Aggregator {
    pub fn new(
        round: Arc<RoundManager>,
        records: Arc<dyn RecordStore>,
        blocks: Arc<dyn BlockStore>,
        role_rx: watch::Receiver<ReplicaRole>,
        server_id: String,
    ) -> Self {
        let smt = Arc::clone(round.smt());
        Self {
            validator: CommitmentValidator::new(Arc::clone(&records)),
            round,
            records,
            blocks,
            smt,
            role_rx,
            server_id,
        }
    }
}

#[async_trait]
impl AggregatorApi for Aggregator {
    async fn submit_commitment(
        &self,
        commitment: Commitment,
    ) -> Result<ValidationOutcome, StorageError> {
        let outcome = self.validator.validate(&commitment).await?;
        if outcome.ok() && !outcome.exists {
            self.round.submit_commitment(&commitment).await?;
        }
        // An idempotent replay (SUCCESS with exists) is acknowledged
        // without re-enqueueing; the stored record already covers it.
        Ok(outcome)
    }

    async fn inclusion_proof(
        &self,
        request_id: &RequestId,
    ) -> Result<InclusionProof, StorageError> {
        let merkle_tree_path = {
            let smt = self.smt.read().await;
            smt.get_path(&request_id.to_path())
        };
        let record = self.records.get(request_id).await?;
        let (authenticator, transaction_hash) = match record {
            Some(r) => (Some(r.authenticator), Some(r.transaction_hash)),
            None => (None, None),
        };
        Ok(InclusionProof {
            merkle_tree_path,
            authenticator,
            transaction_hash,
        })
    }

    async fn block_height(&self) -> Result<u64, StorageError> {
        Ok(self
            .blocks
            .get(BlockQuery::Latest)
            .await?
            .map(|b| b.index)
            .unwrap_or(0))
    }

    async fn block(&self, query: BlockQuery) -> Result<Option<Block>, StorageError> {
        self.blocks.get(query).await
    }

    async fn block_commitments(
        &self,
        block_number: u64,
    ) -> Result<Option<Vec<AggregatorRecord>>, StorageError> {
        let Some(records) = self.blocks.get_records(block_number).await? else {
            return Ok(None);
        };
        let stored = self.records.get_by_request_ids(&records.request_ids).await?;
        let mut by_id: HashMap<RequestId, AggregatorRecord> = stored
            .into_iter()
            .map(|r| (r.request_id.clone(), r))
            .collect();
        // Preserve the block's canonical order.
        Ok(Some(
            records
                .request_ids
                .iter()
                .filter_map(|id| by_id.remove(id))
                .collect(),
        ))
    }

    async fn health(&self) -> NodeHealth {
        let role = *self.role_rx.borrow();
        NodeHealth {
            role,
            server_id: self.server_id.clone(),
            smt_root_hash: self.smt.read().await.root_hash(),
        }
    }
}
