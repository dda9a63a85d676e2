//! One in-memory backend implementing every store contract.
//!
//! Semantics mirror the Postgres implementations: insert-if-absent
//! records, atomic queue drain, transactional block append with next-index
//! enforcement, insertion-sequenced leaves, clock-checked leases.

use arx_api::feed::{ChangeFeed, FeedEvent};
use arx_api::store::{
    BlockStore, CursorStore, LeafChunk, LeafStore, LeaseStore, PendingQueue, RecordStore,
};
use arx_types::block::{Block, BlockQuery, BlockRecords};
use arx_types::cluster::{LeadershipLease, LEADERSHIP_LOCK_ID};
use arx_types::commitment::{AggregatorRecord, Commitment, LeafPath, RequestId, SmtLeaf};
use arx_types::error::StorageError;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Pending,
    Processing,
}

struct QueueEntry {
    id: u64,
    commitment: Commitment,
    state: QueueState,
}

/// Shared in-memory state behind every trait. Wrap in an `Arc` and hand
/// the same instance out as each store.
#[derive(Default)]
pub struct InMemoryBackend {
    records: Mutex<HashMap<RequestId, AggregatorRecord>>,
    record_seq: AtomicU64,
    queue: Mutex<Vec<QueueEntry>>,
    queue_seq: AtomicU64,
    blocks: Mutex<BTreeMap<u64, Block>>,
    blockrecords: Mutex<BTreeMap<u64, BlockRecords>>,
    leaf_index: Mutex<HashMap<LeafPath, usize>>,
    leaves: Mutex<Vec<SmtLeaf>>,
    lease: Mutex<Option<LeadershipLease>>,
    cursors: Mutex<HashMap<String, u64>>,
    feed_notify: Notify,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: how many commitments sit in PROCESSING.
    pub fn processing_count(&self) -> usize {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.state == QueueState::Processing)
            .count()
    }

    /// Test hook: how many commitments sit in the queue at all.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Test hook: drop leaves so follower fetches come up short.
    pub fn remove_leaves(&self, paths: &[LeafPath]) {
        let mut index = self.leaf_index.lock().unwrap();
        for path in paths {
            index.remove(path);
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryBackend {
    async fn put(&self, record: &AggregatorRecord) -> Result<(), StorageError> {
        RecordStore::put_batch(self, std::slice::from_ref(record)).await
    }

    async fn put_batch(&self, records: &[AggregatorRecord]) -> Result<(), StorageError> {
        let mut map = self.records.lock().unwrap();
        for record in records {
            map.entry(record.request_id.clone()).or_insert_with(|| {
                let mut stored = record.clone();
                stored.sequence_id = Some(self.record_seq.fetch_add(1, Ordering::SeqCst) + 1);
                stored
            });
        }
        Ok(())
    }

    async fn get(&self, request_id: &RequestId) -> Result<Option<AggregatorRecord>, StorageError> {
        Ok(self.records.lock().unwrap().get(request_id).cloned())
    }

    async fn get_by_request_ids(
        &self,
        ids: &[RequestId],
    ) -> Result<Vec<AggregatorRecord>, StorageError> {
        let map = self.records.lock().unwrap();
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }
}

#[async_trait]
impl PendingQueue for InMemoryBackend {
    async fn put(&self, commitment: &Commitment) -> Result<(), StorageError> {
        self.queue.lock().unwrap().push(QueueEntry {
            id: self.queue_seq.fetch_add(1, Ordering::SeqCst),
            commitment: commitment.clone(),
            state: QueueState::Pending,
        });
        Ok(())
    }

    async fn drain_for_block(&self) -> Result<Vec<Commitment>, StorageError> {
        let mut queue = self.queue.lock().unwrap();
        let mut drained: Vec<&mut QueueEntry> = queue
            .iter_mut()
            .filter(|e| e.state == QueueState::Pending)
            .collect();
        drained.sort_by_key(|e| e.id);
        Ok(drained
            .into_iter()
            .map(|e| {
                e.state = QueueState::Processing;
                e.commitment.clone()
            })
            .collect())
    }

    async fn confirm_block_processed(&self) -> Result<(), StorageError> {
        self.queue
            .lock()
            .unwrap()
            .retain(|e| e.state != QueueState::Processing);
        Ok(())
    }

    async fn recover_orphaned(&self) -> Result<u64, StorageError> {
        let mut queue = self.queue.lock().unwrap();
        let mut recovered = 0;
        for entry in queue.iter_mut() {
            if entry.state == QueueState::Processing {
                entry.state = QueueState::Pending;
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

#[async_trait]
impl BlockStore for InMemoryBackend {
    async fn next_block_number(&self) -> Result<u64, StorageError> {
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks.keys().next_back().copied().unwrap_or(0) + 1)
    }

    async fn append(&self, block: &Block, records: &BlockRecords) -> Result<(), StorageError> {
        if block.index != records.block_number {
            return Err(StorageError::Conflict(format!(
                "block {} carries records for block {}",
                block.index, records.block_number
            )));
        }
        {
            let mut blocks = self.blocks.lock().unwrap();
            let next = blocks.keys().next_back().copied().unwrap_or(0) + 1;
            if block.index != next {
                return Err(StorageError::Conflict(format!(
                    "block {} is not the next block (expected {next})",
                    block.index
                )));
            }
            blocks.insert(block.index, block.clone());
            self.blockrecords
                .lock()
                .unwrap()
                .insert(records.block_number, records.clone());
        }
        self.feed_notify.notify_waiters();
        Ok(())
    }

    async fn get(&self, query: BlockQuery) -> Result<Option<Block>, StorageError> {
        let blocks = self.blocks.lock().unwrap();
        Ok(match query {
            BlockQuery::Number(n) => blocks.get(&n).cloned(),
            BlockQuery::Latest => blocks.values().next_back().cloned(),
        })
    }

    async fn get_records(&self, block_number: u64) -> Result<Option<BlockRecords>, StorageError> {
        Ok(self.blockrecords.lock().unwrap().get(&block_number).cloned())
    }
}

#[async_trait]
impl LeafStore for InMemoryBackend {
    async fn put_batch(&self, batch: &[SmtLeaf]) -> Result<(), StorageError> {
        let mut index = self.leaf_index.lock().unwrap();
        let mut leaves = self.leaves.lock().unwrap();
        for leaf in batch {
            index.entry(leaf.path).or_insert_with(|| {
                leaves.push(leaf.clone());
                leaves.len() - 1
            });
        }
        Ok(())
    }

    async fn get_by_paths(&self, paths: &[LeafPath]) -> Result<Vec<SmtLeaf>, StorageError> {
        let index = self.leaf_index.lock().unwrap();
        let leaves = self.leaves.lock().unwrap();
        Ok(paths
            .iter()
            .filter_map(|p| index.get(p).and_then(|i| leaves.get(*i)).cloned())
            .collect())
    }

    async fn scan_chunk(
        &self,
        after_sequence: u64,
        limit: u32,
    ) -> Result<LeafChunk, StorageError> {
        let leaves = self.leaves.lock().unwrap();
        let chunk: Vec<SmtLeaf> = leaves
            .iter()
            .skip(after_sequence as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        let last_sequence = if chunk.is_empty() {
            None
        } else {
            Some(after_sequence + chunk.len() as u64)
        };
        Ok(LeafChunk {
            leaves: chunk,
            last_sequence,
        })
    }
}

#[async_trait]
impl LeaseStore for InMemoryBackend {
    async fn try_acquire(&self, holder_id: &str, ttl: Duration) -> Result<bool, StorageError> {
        let now = Utc::now();
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::seconds(30));
        let mut lease = self.lease.lock().unwrap();
        let takeover = match lease.as_ref() {
            None => true,
            Some(l) => l.expires_at < now || l.holder_id == holder_id,
        };
        if takeover {
            *lease = Some(LeadershipLease {
                lock_id: LEADERSHIP_LOCK_ID.to_string(),
                holder_id: holder_id.to_string(),
                acquired_at: now,
                heartbeat_at: now,
                expires_at: now + ttl,
            });
        }
        Ok(takeover)
    }

    async fn heartbeat(&self, holder_id: &str, ttl: Duration) -> Result<bool, StorageError> {
        let now = Utc::now();
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::seconds(30));
        let mut lease = self.lease.lock().unwrap();
        match lease.as_mut() {
            Some(l) if l.holder_id == holder_id && l.expires_at > now => {
                l.heartbeat_at = now;
                l.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, holder_id: &str) -> Result<(), StorageError> {
        let mut lease = self.lease.lock().unwrap();
        if lease.as_ref().is_some_and(|l| l.holder_id == holder_id) {
            *lease = None;
        }
        Ok(())
    }

    async fn current(&self) -> Result<Option<LeadershipLease>, StorageError> {
        Ok(self.lease.lock().unwrap().clone())
    }
}

#[async_trait]
impl CursorStore for InMemoryBackend {
    async fn load(&self, stream_id: &str) -> Result<Option<u64>, StorageError> {
        Ok(self.cursors.lock().unwrap().get(stream_id).copied())
    }

    async fn save(&self, stream_id: &str, position: u64) -> Result<(), StorageError> {
        self.cursors
            .lock()
            .unwrap()
            .insert(stream_id.to_string(), position);
        Ok(())
    }

    async fn clear(&self, stream_id: &str) -> Result<(), StorageError> {
        self.cursors.lock().unwrap().remove(stream_id);
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for InMemoryBackend {
    async fn poll_after(&self, cursor: u64, limit: u32) -> Result<Vec<FeedEvent>, StorageError> {
        let records = self.blockrecords.lock().unwrap();
        Ok(records
            .range(cursor + 1..)
            .take(limit as usize)
            .map(|(n, r)| FeedEvent {
                block_number: *n,
                request_ids: r.request_ids.clone(),
            })
            .collect())
    }

    async fn head(&self) -> Result<u64, StorageError> {
        let records = self.blockrecords.lock().unwrap();
        Ok(records.keys().next_back().copied().unwrap_or(0))
    }

    async fn wait_for_append(&self, timeout: Duration) -> Result<(), StorageError> {
        let _ = tokio::time::timeout(timeout, self.feed_notify.notified()).await;
        Ok(())
    }
}
