//! The round scheduler.
//!
//! Rounds fire aligned to whole-second wallclock boundaries while the
//! replica leads. A failed round backs off one second before the retry.
//! Rounds are strictly serialized: the timer re-arms only after the
//! previous invocation returned. Cancellation is cooperative: shutdown
//! stops re-arming and lets an in-flight round finish; the node bounds
//! that wait.

use crate::round::RoundManager;
use arx_types::cluster::ReplicaRole;
use arx_types::error::RoundError;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

const FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// Time until the next whole-second boundary.
fn until_next_second() -> Duration {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let into_second = (now_ms % 1000) as u64;
    Duration::from_millis(1000 - into_second)
}

/// Drives `create_block` on the leader cadence.
pub struct BlockProducer {
    round: Arc<RoundManager>,
}

impl BlockProducer {
    pub fn new(round: Arc<RoundManager>) -> Self {
        Self { round }
    }

    /// Runs until shutdown. Leadership transitions arm and disarm the
    /// timer; a transition to leader first requeues orphaned commitments.
    pub async fn run(
        self,
        mut role_rx: watch::Receiver<ReplicaRole>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let metrics = arx_telemetry::metrics();
        let mut active = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let is_leader = role_rx.borrow().is_leader();
            if is_leader != active {
                active = is_leader;
                metrics.set_is_leader(active);
                if active {
                    tracing::info!(target: "round", "block production activated");
                    if let Err(e) = self.round.activate_leadership().await {
                        // The next drain still sees the orphans as
                        // PROCESSING only until a later recovery pass.
                        tracing::error!(
                            target: "round",
                            error = %e,
                            "orphan recovery failed, continuing"
                        );
                    }
                } else {
                    tracing::info!(target: "round", "block production deactivated");
                }
            }

            if !active {
                tokio::select! {
                    _ = role_rx.changed() => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(until_next_second()) => {}
                _ = shutdown.changed() => continue,
                _ = role_rx.changed() => continue,
            }

            // Leadership may have lapsed during the sleep; an in-flight
            // round is allowed to finish, but a new one must not start.
            if !role_rx.borrow().is_leader() || *shutdown.borrow() {
                continue;
            }

            match self.round.create_block().await {
                Ok(_) => {}
                Err(RoundError::IndexTaken { expected }) => {
                    tracing::warn!(
                        target: "round",
                        block = expected,
                        "another writer appended this block, backing off"
                    );
                    tokio::time::sleep(FAILURE_BACKOFF).await;
                }
                Err(e) => {
                    tracing::error!(target: "round", error = %e, "round failed");
                    tokio::time::sleep(FAILURE_BACKOFF).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::MockAnchorClient;
    use crate::round::RoundConfig;
    use arx_smt::SparseMerkleTree;
    use arx_test_utils::InMemoryBackend;
    use arx_types::block::BlockQuery;
    use arx_types::hash::DataHash;
    use tokio::sync::RwLock;

    fn producer(backend: &Arc<InMemoryBackend>) -> BlockProducer {
        let rm = RoundManager::new(
            Arc::new(RwLock::new(SparseMerkleTree::new())),
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
            Arc::new(MockAnchorClient::new()),
            RoundConfig {
                chain_id: 1,
                version: 1,
                fork_id: 1,
                initial_block_hash: DataHash::sha256(b"genesis"),
            },
        );
        BlockProducer::new(Arc::new(rm))
    }

    #[tokio::test]
    async fn produces_blocks_only_while_leader() {
        use arx_api::store::BlockStore;

        let backend = Arc::new(InMemoryBackend::new());
        let (role_tx, role_rx) = watch::channel(ReplicaRole::Follower);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(producer(&backend).run(role_rx, shutdown_rx));

        // Follower: no blocks.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(backend.get(BlockQuery::Latest).await.unwrap().is_none());

        // Leader: at least one block within two boundaries.
        role_tx.send(ReplicaRole::Leader).unwrap();
        tokio::time::sleep(Duration::from_millis(2200)).await;
        let latest = backend.get(BlockQuery::Latest).await.unwrap().unwrap();
        assert!(latest.index >= 1);

        // Demoted: production stops.
        role_tx.send(ReplicaRole::Follower).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let frozen = backend.get(BlockQuery::Latest).await.unwrap().unwrap().index;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(
            backend.get(BlockQuery::Latest).await.unwrap().unwrap().index,
            frozen
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
