//! The round manager.
//!
//! One round drains the pending queue, persists records and leaves while
//! the tree absorbs the batch, notarizes the new root, and appends the
//! block with its record list in one transaction. Every step is idempotent
//! or retryable: an aborted round leaves the queue in PROCESSING for the
//! next leader, re-inserts are no-ops, and a re-anchored root witnesses
//! itself.

use arx_api::anchor::TrustAnchorClient;
use arx_api::store::{BlockStore, LeafStore, PendingQueue, RecordStore};
use arx_smt::SparseMerkleTree;
use arx_types::block::{Block, BlockQuery, BlockRecords};
use arx_types::commitment::{AggregatorRecord, Commitment, SmtLeaf};
use arx_types::error::{RoundError, StorageError};
use arx_types::hash::DataHash;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Chain identity baked into every block.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    pub chain_id: u64,
    pub version: u64,
    pub fork_id: u64,
    /// Chained as `previousBlockHash` of block 1.
    pub initial_block_hash: DataHash,
}

/// Orchestrates block production. `create_block` is exclusive to the
/// current leader and strictly serialized by the scheduler.
pub struct RoundManager {
    smt: Arc<RwLock<SparseMerkleTree>>,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn PendingQueue>,
    leaves: Arc<dyn LeafStore>,
    blocks: Arc<dyn BlockStore>,
    anchor: Arc<dyn TrustAnchorClient>,
    config: RoundConfig,
}

impl RoundManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        smt: Arc<RwLock<SparseMerkleTree>>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn PendingQueue>,
        leaves: Arc<dyn LeafStore>,
        blocks: Arc<dyn BlockStore>,
        anchor: Arc<dyn TrustAnchorClient>,
        config: RoundConfig,
    ) -> Self {
        Self {
            smt,
            records,
            queue,
            leaves,
            blocks,
            anchor,
            config,
        }
    }

    pub fn smt(&self) -> &Arc<RwLock<SparseMerkleTree>> {
        &self.smt
    }

    /// Durably enqueues a validated commitment for the next block.
    pub async fn submit_commitment(&self, commitment: &Commitment) -> Result<(), StorageError> {
        self.queue.put(commitment).await
    }

    /// Called on every leadership activation, before the first round:
    /// PROCESSING entries from a crashed or demoted leader become PENDING
    /// again, so the next drain includes them.
    pub async fn activate_leadership(&self) -> Result<(), StorageError> {
        let recovered = self.queue.recover_orphaned().await?;
        if recovered > 0 {
            tracing::info!(
                target: "round",
                recovered,
                "requeued orphaned commitments from a previous leader"
            );
        }
        Ok(())
    }

    /// Produces one block. Empty rounds still produce a block to keep the
    /// anchor heartbeat.
    pub async fn create_block(&self) -> Result<Block, RoundError> {
        let started = Instant::now();
        let n = self.blocks.next_block_number().await?;
        let drained = self.queue.drain_for_block().await?;

        // Concurrent submitters that both validated against an empty
        // record store can both be in the drain; the first occurrence
        // wins, matching the record store's insert-if-absent.
        let mut seen = HashSet::new();
        let admitted: Vec<Commitment> = drained
            .into_iter()
            .filter(|c| seen.insert(c.request_id.clone()))
            .collect();

        let records: Vec<AggregatorRecord> =
            admitted.iter().cloned().map(AggregatorRecord::from).collect();
        let leaves: Vec<SmtLeaf> = admitted.iter().map(Commitment::to_leaf).collect();

        // Record and leaf persistence proceed while the tree absorbs the
        // batch; both must be durable before the anchor call.
        let records_task = {
            let store = Arc::clone(&self.records);
            let records = records.clone();
            tokio::spawn(async move { store.put_batch(&records).await })
        };
        let leaves_task = {
            let store = Arc::clone(&self.leaves);
            let leaves = leaves.clone();
            tokio::spawn(async move { store.put_batch(&leaves).await })
        };

        let root = {
            let mut smt = self.smt.write().await;
            // Identical duplicates are recovery replays and are skipped
            // inside the tree; any other conflict aborts the round.
            let outcome = smt.add_leaves(leaves)?;
            if outcome.duplicates > 0 {
                tracing::debug!(
                    target: "round",
                    block = n,
                    duplicates = outcome.duplicates,
                    "skipped identical leaves during replay"
                );
            }
            smt.root_hash()
        };

        join_persistence(records_task).await?;
        join_persistence(leaves_task).await?;

        let receipt = self.anchor.submit_root_hash(&root).await?;

        let previous_block_hash = if n == 1 {
            self.config.initial_block_hash.clone()
        } else {
            self.previous_hash_for(n, receipt.previous_root_witness.clone())
                .await?
        };

        let block = Block {
            index: n,
            chain_id: self.config.chain_id,
            version: self.config.version,
            fork_id: self.config.fork_id,
            timestamp: receipt.timestamp,
            anchor_proof: receipt.proof,
            previous_block_hash,
            root_hash: root,
            no_deletion_proof_hash: None,
        };
        let block_records = BlockRecords {
            block_number: n,
            request_ids: admitted.iter().map(|c| c.request_id.clone()).collect(),
        };

        match self.blocks.append(&block, &block_records).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => return Err(RoundError::IndexTaken { expected: n }),
            Err(e) => return Err(e.into()),
        }

        if !admitted.is_empty() {
            self.queue.confirm_block_processed().await?;
        }

        let metrics = arx_telemetry::metrics();
        metrics.inc_commitments(admitted.len() as u64);
        metrics.inc_blocks_produced();
        metrics.set_block_height(n);
        metrics.observe_round_duration(started.elapsed().as_secs_f64());
        tracing::info!(
            target: "round",
            block = n,
            commitments = admitted.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "block created"
        );
        Ok(block)
    }

    /// The witnessed previous root for block `n > 1`. The witness is used
    /// verbatim; a mismatch with the locally stored previous root is
    /// logged, not rejected. A missing witness (fresh anchor against an
    /// existing chain) falls back to the stored previous root.
    async fn previous_hash_for(
        &self,
        n: u64,
        witness: Option<DataHash>,
    ) -> Result<DataHash, RoundError> {
        let local_previous = self
            .blocks
            .get(BlockQuery::Number(n - 1))
            .await?
            .map(|b| b.root_hash);
        match witness {
            Some(witness) => {
                if let Some(local) = &local_previous {
                    if *local != witness {
                        tracing::warn!(
                            target: "round",
                            block = n,
                            witness = %witness,
                            local = %local,
                            "anchor witness differs from stored previous root"
                        );
                    }
                }
                Ok(witness)
            }
            None => local_previous.ok_or_else(|| {
                RoundError::Storage(StorageError::NotFound)
            }),
        }
    }
}

async fn join_persistence(
    task: tokio::task::JoinHandle<Result<(), StorageError>>,
) -> Result<(), RoundError> {
    match task.await {
        Ok(result) => result.map_err(RoundError::from),
        Err(e) => Err(RoundError::Storage(StorageError::Backend(format!(
            "persistence task failed: {e}"
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::MockAnchorClient;
    use arx_test_utils::{CommitmentFactory, InMemoryBackend};
    use arx_types::commitment::RequestId;

    fn manager(backend: &Arc<InMemoryBackend>) -> RoundManager {
        manager_with_smt(backend, Arc::new(RwLock::new(SparseMerkleTree::new())))
    }

    fn manager_with_smt(
        backend: &Arc<InMemoryBackend>,
        smt: Arc<RwLock<SparseMerkleTree>>,
    ) -> RoundManager {
        manager_with_anchor(backend, smt, Arc::new(MockAnchorClient::new()))
    }

    fn manager_with_anchor(
        backend: &Arc<InMemoryBackend>,
        smt: Arc<RwLock<SparseMerkleTree>>,
        anchor: Arc<dyn TrustAnchorClient>,
    ) -> RoundManager {
        RoundManager::new(
            smt,
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
            anchor,
            RoundConfig {
                chain_id: 1,
                version: 1,
                fork_id: 1,
                initial_block_hash: DataHash::sha256(b"genesis"),
            },
        )
    }

    /// An anchor that parks inside `submit_root_hash` until released, so
    /// tests can interleave a rival writer mid-round.
    struct GatedAnchor {
        inner: MockAnchorClient,
        entered: tokio::sync::mpsc::UnboundedSender<()>,
        release: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait::async_trait]
    impl TrustAnchorClient for GatedAnchor {
        async fn submit_root_hash(
            &self,
            root: &DataHash,
        ) -> Result<arx_api::anchor::AnchorReceipt, arx_types::error::AnchorError> {
            let _ = self.entered.send(());
            let _permit = self.release.acquire().await;
            self.inner.submit_root_hash(root).await
        }
    }

    #[tokio::test]
    async fn single_commitment_round() {
        let backend = Arc::new(InMemoryBackend::new());
        let rm = manager(&backend);
        let c = CommitmentFactory::random().commitment(b"state", b"tx");
        rm.submit_commitment(&c).await.unwrap();

        let block = rm.create_block().await.unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.previous_block_hash, DataHash::sha256(b"genesis"));
        assert_eq!(block.root_hash, rm.smt().read().await.root_hash());
        assert_eq!(block.no_deletion_proof_hash, None);

        let records = backend.get_records(1).await.unwrap().unwrap();
        assert_eq!(records.request_ids, vec![c.request_id.clone()]);
        // Queue confirmed empty, record and leaf durable.
        assert_eq!(backend.queue_len(), 0);
        assert!(RecordStore::get(backend.as_ref(), &c.request_id)
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            backend
                .get_by_paths(&[c.request_id.to_path()])
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn empty_rounds_still_produce_blocks() {
        let backend = Arc::new(InMemoryBackend::new());
        let rm = manager(&backend);

        let b1 = rm.create_block().await.unwrap();
        let b2 = rm.create_block().await.unwrap();
        assert_eq!((b1.index, b2.index), (1, 2));
        assert_eq!(
            backend.get_records(1).await.unwrap().unwrap().request_ids,
            Vec::<RequestId>::new()
        );
        // Empty rounds share the same (empty) root.
        assert_eq!(b1.root_hash, b2.root_hash);
    }

    #[tokio::test]
    async fn chain_links_through_anchor_witness() {
        let backend = Arc::new(InMemoryBackend::new());
        let rm = manager(&backend);
        let factory = CommitmentFactory::random();

        rm.submit_commitment(&factory.commitment(b"s1", b"t1"))
            .await
            .unwrap();
        let b1 = rm.create_block().await.unwrap();
        rm.submit_commitment(&factory.commitment(b"s2", b"t2"))
            .await
            .unwrap();
        let b2 = rm.create_block().await.unwrap();
        rm.submit_commitment(&factory.commitment(b"s3", b"t3"))
            .await
            .unwrap();
        let b3 = rm.create_block().await.unwrap();

        // The mock anchor witnesses the previously submitted root.
        assert_eq!(b2.previous_block_hash, b1.root_hash);
        assert_eq!(b3.previous_block_hash, b2.root_hash);
        assert_eq!((b1.index, b2.index, b3.index), (1, 2, 3));
    }

    #[tokio::test]
    async fn duplicate_submissions_commit_once() {
        let backend = Arc::new(InMemoryBackend::new());
        let rm = manager(&backend);
        let c = CommitmentFactory::random().commitment(b"state", b"tx");

        // Both submissions raced past validation.
        rm.submit_commitment(&c).await.unwrap();
        rm.submit_commitment(&c).await.unwrap();

        let block = rm.create_block().await.unwrap();
        assert_eq!(block.index, 1);
        let records = backend.get_records(1).await.unwrap().unwrap();
        assert_eq!(records.request_ids, vec![c.request_id.clone()]);
    }

    #[tokio::test]
    async fn drained_commitments_survive_a_crash() {
        let backend = Arc::new(InMemoryBackend::new());
        let c = CommitmentFactory::random().commitment(b"state", b"tx");
        {
            let rm = manager(&backend);
            rm.submit_commitment(&c).await.unwrap();
            // Simulated crash after drain: entries stuck in PROCESSING.
            let drained = backend.drain_for_block().await.unwrap();
            assert_eq!(drained.len(), 1);
            assert_eq!(backend.processing_count(), 1);
        }

        // A promoted replica recovers the orphans and includes them.
        let rm = manager(&backend);
        rm.activate_leadership().await.unwrap();
        let block = rm.create_block().await.unwrap();
        assert_eq!(
            backend.get_records(block.index).await.unwrap().unwrap().request_ids,
            vec![c.request_id.clone()]
        );
        assert_eq!(backend.queue_len(), 0);
    }

    #[tokio::test]
    async fn replayed_round_tolerates_existing_leaves() {
        let backend = Arc::new(InMemoryBackend::new());
        let c = CommitmentFactory::random().commitment(b"state", b"tx");
        let smt = Arc::new(RwLock::new(SparseMerkleTree::new()));

        // First attempt wrote the leaf into the store and the tree, then
        // died before the block append.
        {
            let rm = manager_with_smt(&backend, smt.clone());
            rm.submit_commitment(&c).await.unwrap();
            backend.drain_for_block().await.unwrap();
            LeafStore::put_batch(backend.as_ref(), &[c.to_leaf()])
                .await
                .unwrap();
            smt.write().await.add_leaves([c.to_leaf()]).unwrap();
        }

        let rm = manager_with_smt(&backend, smt);
        rm.activate_leadership().await.unwrap();
        let block = rm.create_block().await.unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(
            backend.get_records(1).await.unwrap().unwrap().request_ids,
            vec![c.request_id.clone()]
        );
    }

    #[tokio::test]
    async fn losing_the_index_race_aborts_without_confirm() {
        let backend = Arc::new(InMemoryBackend::new());
        let (entered_tx, mut entered_rx) = tokio::sync::mpsc::unbounded_channel();
        let release = Arc::new(tokio::sync::Semaphore::new(0));
        let rm = Arc::new(manager_with_anchor(
            &backend,
            Arc::new(RwLock::new(SparseMerkleTree::new())),
            Arc::new(GatedAnchor {
                inner: MockAnchorClient::new(),
                entered: entered_tx,
                release: release.clone(),
            }),
        ));

        let c = CommitmentFactory::random().commitment(b"state", b"tx");
        rm.submit_commitment(&c).await.unwrap();

        // Our round drains the queue and parks at the anchor call.
        let round = tokio::spawn({
            let rm = rm.clone();
            async move { rm.create_block().await }
        });
        entered_rx.recv().await.unwrap();

        // A rival leader appends block 1 in the meantime.
        manager(&backend).create_block().await.unwrap();

        release.add_permits(1);
        let err = round.await.unwrap().unwrap_err();
        assert!(matches!(err, RoundError::IndexTaken { expected: 1 }));
        // The queue keeps its PROCESSING entries for the retry.
        assert_eq!(backend.processing_count(), 1);

        // The retry lands in block 2.
        rm.activate_leadership().await.unwrap();
        release.add_permits(1);
        let block = rm.create_block().await.unwrap();
        assert_eq!(block.index, 2);
        assert_eq!(
            backend.get_records(2).await.unwrap().unwrap().request_ids,
            vec![c.request_id]
        );
    }
}
