//! The follower SMT synchronizer.
//!
//! Consumes the block-records change feed and applies each event's leaves
//! to the in-memory tree. The leaf fetch retries with exponential backoff
//! because the leader's leaf write and the feed emission are two durable
//! operations; on replicated storage the leaf may momentarily trail the
//! event. A shortfall that survives every retry is an invariant violation:
//! the error is fatal and the process restarts into a full tree reload.

use arx_api::feed::{ChangeFeed, FeedEvent};
use arx_api::store::{CursorStore, LeafStore};
use arx_smt::SparseMerkleTree;
use arx_types::cluster::ReplicaRole;
use arx_types::commitment::{LeafPath, SmtLeaf};
use arx_types::error::SyncError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// Synchronizer tuning. The retry ladder is fixed by contract: five
/// retries at 1, 2, 4, 8, 16 seconds.
#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    /// Stream id the resume cursor is stored under.
    pub stream_id: String,
    /// Events fetched per poll.
    pub poll_limit: u32,
    /// How long one idle wait parks before re-polling anyway.
    pub idle_wait: Duration,
    /// Backoff ladder for the leaf fetch.
    pub leaf_retry_backoff: Vec<Duration>,
}

impl SynchronizerConfig {
    pub fn new(stream_id: String) -> Self {
        Self {
            stream_id,
            poll_limit: 64,
            idle_wait: Duration::from_secs(1),
            leaf_retry_backoff: [1, 2, 4, 8, 16]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

/// Keeps a non-leader replica's tree identical to the leader's.
pub struct SmtSynchronizer {
    feed: Arc<dyn ChangeFeed>,
    cursors: Arc<dyn CursorStore>,
    leaves: Arc<dyn LeafStore>,
    smt: Arc<RwLock<SparseMerkleTree>>,
    config: SynchronizerConfig,
}

impl SmtSynchronizer {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        cursors: Arc<dyn CursorStore>,
        leaves: Arc<dyn LeafStore>,
        smt: Arc<RwLock<SparseMerkleTree>>,
        config: SynchronizerConfig,
    ) -> Self {
        Self {
            feed,
            cursors,
            leaves,
            smt,
            config,
        }
    }

    /// Runs until shutdown. Applies events only while the replica is a
    /// follower; an `Err` return is fatal and must terminate the process.
    pub async fn run(
        &self,
        mut role_rx: watch::Receiver<ReplicaRole>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SyncError> {
        let mut cursor = self.resume_position().await?;
        let mut transport_failures = 0u32;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            if role_rx.borrow().is_leader() {
                // Leaders mutate the tree through block production; park
                // until the role flips back.
                tokio::select! {
                    _ = role_rx.changed() => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            let events = match self.feed.poll_after(cursor, self.config.poll_limit).await {
                Ok(events) => {
                    transport_failures = 0;
                    events
                }
                Err(e) => {
                    transport_failures += 1;
                    let backoff =
                        Duration::from_secs(2u64.saturating_pow(transport_failures.min(5)));
                    tracing::warn!(
                        target: "smt-sync",
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "change feed poll failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            if events.is_empty() {
                // The feed head can fall behind a stale cursor only when
                // history was rewritten underneath us (restored database).
                let head = self.feed.head().await.unwrap_or(cursor);
                if cursor > head {
                    tracing::warn!(
                        target: "smt-sync",
                        cursor,
                        head,
                        "cursor is past the feed head, restarting from head"
                    );
                    if let Err(e) = self.cursors.clear(&self.config.stream_id).await {
                        tracing::warn!(target: "smt-sync", error = %e, "cursor clear failed");
                    }
                    cursor = head;
                    continue;
                }
                tokio::select! {
                    _ = self.feed.wait_for_append(self.config.idle_wait) => {}
                    _ = shutdown.changed() => {}
                    _ = role_rx.changed() => {}
                }
                continue;
            }

            for event in events {
                self.apply_event(&event).await?;
                cursor = event.block_number;
                // A failed save only means this span replays after a
                // restart; duplicates are tolerated by the tree.
                if let Err(e) = self.cursors.save(&self.config.stream_id, cursor).await {
                    tracing::warn!(target: "smt-sync", error = %e, "cursor save failed");
                }
            }
        }
    }

    /// Loads the stored cursor, or captures the current head so a fresh
    /// subscriber does not replay prehistory (boot reload already covered
    /// it).
    async fn resume_position(&self) -> Result<u64, SyncError> {
        match self.cursors.load(&self.config.stream_id).await? {
            Some(position) => Ok(position),
            None => {
                let head = self.feed.head().await?;
                tracing::info!(
                    target: "smt-sync",
                    stream = %self.config.stream_id,
                    head,
                    "no resume cursor, starting from feed head"
                );
                Ok(head)
            }
        }
    }

    /// One fetch attempt; transport errors count as an empty result and
    /// consume a rung of the retry ladder.
    async fn fetch_leaves(&self, paths: &[LeafPath]) -> Vec<SmtLeaf> {
        match self.leaves.get_by_paths(paths).await {
            Ok(leaves) => leaves,
            Err(e) => {
                tracing::warn!(target: "smt-sync", error = %e, "leaf fetch failed");
                Vec::new()
            }
        }
    }

    /// Fetches and applies one event's leaves. Missing leaves after the
    /// full retry ladder are fatal.
    async fn apply_event(&self, event: &FeedEvent) -> Result<(), SyncError> {
        if event.request_ids.is_empty() {
            return Ok(());
        }
        let paths: Vec<_> = event.request_ids.iter().map(|id| id.to_path()).collect();

        // Fetch errors ride the same ladder as shortfalls: the leaf write
        // and the feed emission are separate durable operations, so the
        // read side may simply be trailing.
        let mut fetched = self.fetch_leaves(&paths).await;
        for backoff in &self.config.leaf_retry_backoff {
            if fetched.len() >= paths.len() {
                break;
            }
            tracing::warn!(
                target: "smt-sync",
                block = event.block_number,
                got = fetched.len(),
                expected = paths.len(),
                backoff_secs = backoff.as_secs(),
                "leaves trail the change feed, retrying"
            );
            tokio::time::sleep(*backoff).await;
            fetched = self.fetch_leaves(&paths).await;
        }
        if fetched.len() < paths.len() {
            return Err(SyncError::MissingLeaves {
                block_number: event.block_number,
                expected: paths.len(),
                got: fetched.len(),
            });
        }

        let outcome = self.smt.write().await.add_leaves(fetched)?;
        arx_telemetry::metrics().inc_sync_events();
        tracing::debug!(
            target: "smt-sync",
            block = event.block_number,
            added = outcome.added,
            duplicates = outcome.duplicates,
            "applied block records"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arx_test_utils::{CommitmentFactory, InMemoryBackend};
    use arx_types::block::{Block, BlockRecords};
    use arx_types::commitment::Commitment;
    use arx_types::hash::DataHash;

    fn block(index: u64, root: &DataHash) -> Block {
        Block {
            index,
            chain_id: 1,
            version: 1,
            fork_id: 1,
            timestamp: 1_700_000_000_000,
            anchor_proof: vec![0xaa],
            previous_block_hash: DataHash::sha256(b"prev"),
            root_hash: root.clone(),
            no_deletion_proof_hash: None,
        }
    }

    async fn publish_block(
        backend: &Arc<InMemoryBackend>,
        leader_smt: &Arc<RwLock<SparseMerkleTree>>,
        index: u64,
        commitments: &[Commitment],
    ) {
        use arx_api::store::{BlockStore, LeafStore};

        let leaves: Vec<_> = commitments.iter().map(|c| c.to_leaf()).collect();
        backend.put_batch(&leaves).await.unwrap();
        let root = {
            let mut smt = leader_smt.write().await;
            smt.add_leaves(leaves).unwrap();
            smt.root_hash()
        };
        let records = BlockRecords {
            block_number: index,
            request_ids: commitments.iter().map(|c| c.request_id.clone()).collect(),
        };
        backend.append(&block(index, &root), &records).await.unwrap();
    }

    fn spawn_synchronizer(
        backend: Arc<InMemoryBackend>,
        smt: Arc<RwLock<SparseMerkleTree>>,
    ) -> (
        tokio::task::JoinHandle<Result<(), SyncError>>,
        watch::Sender<bool>,
    ) {
        let mut config = SynchronizerConfig::new("blockRecords_test".into());
        config.idle_wait = Duration::from_millis(20);
        config.leaf_retry_backoff = vec![Duration::from_millis(10); 2];
        let sync = SmtSynchronizer::new(
            backend.clone(),
            backend.clone(),
            backend,
            smt,
            config,
        );
        let (_role_tx, role_rx) = watch::channel(ReplicaRole::Follower);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let _keep_role_alive = _role_tx;
            sync.run(role_rx, shutdown_rx).await
        });
        (handle, shutdown_tx)
    }

    #[tokio::test]
    async fn follower_converges_to_leader_root() {
        let backend = Arc::new(InMemoryBackend::new());
        let leader_smt = Arc::new(RwLock::new(SparseMerkleTree::new()));
        let follower_smt = Arc::new(RwLock::new(SparseMerkleTree::new()));

        let (handle, shutdown_tx) = spawn_synchronizer(backend.clone(), follower_smt.clone());

        let factory = CommitmentFactory::random();
        for n in 1..=3u64 {
            let commitments: Vec<_> = (0..4)
                .map(|i| {
                    factory.commitment(
                        format!("state-{n}-{i}").as_bytes(),
                        format!("tx-{n}-{i}").as_bytes(),
                    )
                })
                .collect();
            publish_block(&backend, &leader_smt, n, &commitments).await;
        }

        // Wait for convergence.
        let want = leader_smt.read().await.root_hash();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if follower_smt.read().await.root_hash() == want {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("follower never converged");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // Cursor advanced to the last applied block.
        use arx_api::store::CursorStore;
        assert_eq!(backend.load("blockRecords_test").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn empty_blocks_are_noops() {
        let backend = Arc::new(InMemoryBackend::new());
        let leader_smt = Arc::new(RwLock::new(SparseMerkleTree::new()));
        let follower_smt = Arc::new(RwLock::new(SparseMerkleTree::new()));
        let (handle, shutdown_tx) = spawn_synchronizer(backend.clone(), follower_smt.clone());

        publish_block(&backend, &leader_smt, 1, &[]).await;

        use arx_api::store::CursorStore;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if backend.load("blockRecords_test").await.unwrap() == Some(1) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("empty block never acknowledged");

        assert!(follower_smt.read().await.is_empty());
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_leaves_after_retries_are_fatal() {
        let backend = Arc::new(InMemoryBackend::new());
        let leader_smt = Arc::new(RwLock::new(SparseMerkleTree::new()));
        let follower_smt = Arc::new(RwLock::new(SparseMerkleTree::new()));
        let (handle, _shutdown_tx) = spawn_synchronizer(backend.clone(), follower_smt);

        // An event whose leaf never made it into the leaf store: build the
        // block by hand so the sabotage is in place before the feed emits.
        use arx_api::store::BlockStore;
        let factory = CommitmentFactory::random();
        let commitment = factory.commitment(b"s", b"t");
        let root = {
            let mut smt = leader_smt.write().await;
            smt.add_leaves([commitment.to_leaf()]).unwrap();
            smt.root_hash()
        };
        let records = BlockRecords {
            block_number: 1,
            request_ids: vec![commitment.request_id.clone()],
        };
        backend.append(&block(1, &root), &records).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("synchronizer kept running")
            .unwrap();
        assert!(matches!(
            result,
            Err(SyncError::MissingLeaves {
                block_number: 1,
                expected: 1,
                got: 0
            })
        ));
    }

    #[tokio::test]
    async fn fresh_subscriber_skips_prehistory() {
        let backend = Arc::new(InMemoryBackend::new());
        let leader_smt = Arc::new(RwLock::new(SparseMerkleTree::new()));
        let factory = CommitmentFactory::random();

        // History exists before the synchronizer first subscribes.
        publish_block(&backend, &leader_smt, 1, &[factory.commitment(b"a", b"b")]).await;

        let follower_smt = Arc::new(RwLock::new(SparseMerkleTree::new()));
        let (handle, shutdown_tx) = spawn_synchronizer(backend.clone(), follower_smt.clone());

        // Give it a moment: nothing should be replayed.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(follower_smt.read().await.is_empty());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
