//! Three-replica cluster flow over one shared backend: election,
//! block production, follower convergence, failover without gaps.

use arx_api::store::{BlockStore, PendingQueue};
use arx_cluster::{ElectionConfig, LeadershipCoordinator, SmtSynchronizer, SynchronizerConfig};
use arx_engine::{reload_smt, BlockProducer, MockAnchorClient, RoundConfig, RoundManager};
use arx_smt::SparseMerkleTree;
use arx_test_utils::{CommitmentFactory, InMemoryBackend};
use arx_types::block::BlockQuery;
use arx_types::cluster::{feed_stream_id, ReplicaRole};
use arx_types::commitment::RequestId;
use arx_types::hash::DataHash;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

struct Replica {
    id: String,
    smt: Arc<RwLock<SparseMerkleTree>>,
    role_rx: watch::Receiver<ReplicaRole>,
    tasks: Vec<JoinHandle<()>>,
}

impl Replica {
    fn is_leader(&self) -> bool {
        self.role_rx.borrow().is_leader()
    }

    /// Crash: no lease release, no graceful anything.
    fn kill(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn spawn_replica(backend: &Arc<InMemoryBackend>, id: &str) -> Replica {
    let smt = Arc::new(RwLock::new(SparseMerkleTree::new()));
    reload_smt(backend.as_ref(), &smt).await.unwrap();

    let round = Arc::new(RoundManager::new(
        smt.clone(),
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
    ));

    let (coordinator, role_rx) = LeadershipCoordinator::new(
        backend.clone(),
        id.to_string(),
        ElectionConfig {
            lock_ttl: Duration::from_millis(600),
            heartbeat_interval: Duration::from_millis(100),
            poll_interval: Duration::from_millis(100),
        },
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    // The sender leaks with the replica; aborting the tasks is the only
    // shutdown these replicas get.
    std::mem::forget(_shutdown_tx);

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(async move {
        let _ = coordinator.run(shutdown_rx).await;
    }));

    let (_shutdown_tx2, shutdown_rx2) = watch::channel(false);
    std::mem::forget(_shutdown_tx2);
    tasks.push(tokio::spawn(
        BlockProducer::new(round.clone()).run(role_rx.clone(), shutdown_rx2),
    ));

    let mut sync_config = SynchronizerConfig::new(feed_stream_id(id));
    sync_config.idle_wait = Duration::from_millis(25);
    let synchronizer = SmtSynchronizer::new(
        backend.clone(),
        backend.clone(),
        backend.clone(),
        smt.clone(),
        sync_config,
    );
    let (_shutdown_tx3, shutdown_rx3) = watch::channel(false);
    std::mem::forget(_shutdown_tx3);
    let sync_role = role_rx.clone();
    tasks.push(tokio::spawn(async move {
        let _ = synchronizer.run(sync_role, shutdown_rx3).await;
    }));

    Replica {
        id: id.to_string(),
        smt,
        role_rx,
        tasks,
    }
}

async fn wait_for<F>(what: &str, timeout: Duration, mut check: F)
where
    F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool>>>,
{
    tokio::time::timeout(timeout, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

fn leaders(replicas: &[&Replica]) -> Vec<String> {
    replicas
        .iter()
        .filter(|r| r.is_leader())
        .map(|r| r.id.clone())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn cluster_elects_produces_converges_and_fails_over() {
    let backend = Arc::new(InMemoryBackend::new());
    let factory = CommitmentFactory::random();

    let mut a = spawn_replica(&backend, "replica-a").await;
    let mut b = spawn_replica(&backend, "replica-b").await;
    let mut c = spawn_replica(&backend, "replica-c").await;

    // Exactly one leader emerges.
    wait_for("a single leader", Duration::from_secs(5), || {
        let views = [&a, &b, &c].map(|r| r.is_leader());
        Box::pin(async move { views.iter().filter(|l| **l).count() == 1 })
    })
    .await;
    assert_eq!(leaders(&[&a, &b, &c]).len(), 1);

    // Commitments submitted against the shared queue land in a block.
    let first_batch: Vec<_> = (0..5)
        .map(|i| factory.commitment(format!("s{i}").as_bytes(), format!("t{i}").as_bytes()))
        .collect();
    for commitment in &first_batch {
        backend.put(commitment).await.unwrap();
    }
    wait_for("first batch committed", Duration::from_secs(5), || {
        let backend = backend.clone();
        let want = first_batch.len();
        Box::pin(async move {
            committed_ids(&backend).await.len() >= want
        })
    })
    .await;

    // Followers converge on the leader's root.
    wait_for("root convergence", Duration::from_secs(5), || {
        let (sa, sb, sc) = (a.smt.clone(), b.smt.clone(), c.smt.clone());
        Box::pin(async move {
            let (ra, rb, rc) = (
                sa.read().await.root_hash(),
                sb.read().await.root_hash(),
                sc.read().await.root_hash(),
            );
            !sa.read().await.is_empty() && ra == rb && rb == rc
        })
    })
    .await;

    // Crash the leader. A survivor takes over within ttl + poll.
    let survivors: Vec<&mut Replica> = {
        if a.is_leader() {
            a.kill();
            vec![&mut b, &mut c]
        } else if b.is_leader() {
            b.kill();
            vec![&mut a, &mut c]
        } else {
            c.kill();
            vec![&mut a, &mut b]
        }
    };
    let s0 = &survivors[0];
    let s1 = &survivors[1];
    wait_for("failover", Duration::from_secs(5), || {
        let views = [s0.is_leader(), s1.is_leader()];
        Box::pin(async move { views.iter().filter(|l| **l).count() == 1 })
    })
    .await;

    // The chain continues without gaps and absorbs another batch.
    let second_batch: Vec<_> = (5..8)
        .map(|i| factory.commitment(format!("s{i}").as_bytes(), format!("t{i}").as_bytes()))
        .collect();
    for commitment in &second_batch {
        backend.put(commitment).await.unwrap();
    }
    wait_for("second batch committed", Duration::from_secs(6), || {
        let backend = backend.clone();
        Box::pin(async move { committed_ids(&backend).await.len() >= 8 })
    })
    .await;

    // Every block number from 1 to the head exists (no gaps), and every
    // fingerprint was committed exactly once.
    let head = backend
        .get(BlockQuery::Latest)
        .await
        .unwrap()
        .unwrap()
        .index;
    let mut seen = HashSet::new();
    for n in 1..=head {
        let block = backend.get(BlockQuery::Number(n)).await.unwrap();
        assert!(block.is_some(), "gap at block {n}");
        let records = backend.get_records(n).await.unwrap().unwrap();
        for id in records.request_ids {
            assert!(seen.insert(id), "fingerprint committed twice");
        }
    }
    assert_eq!(seen.len(), 8);

    // Survivors converge again.
    wait_for("post-failover convergence", Duration::from_secs(5), || {
        let (sa, sb) = (s0.smt.clone(), s1.smt.clone());
        Box::pin(async move {
            let (ra, rb) = (sa.read().await.root_hash(), sb.read().await.root_hash());
            ra == rb && sa.read().await.len() == 8
        })
    })
    .await;
}

async fn committed_ids(backend: &Arc<InMemoryBackend>) -> HashSet<RequestId> {
    let mut out = HashSet::new();
    let head = match backend.get(BlockQuery::Latest).await.unwrap() {
        Some(b) => b.index,
        None => return out,
    };
    for n in 1..=head {
        if let Some(records) = backend.get_records(n).await.unwrap() {
            out.extend(records.request_ids);
        }
    }
    out
}
