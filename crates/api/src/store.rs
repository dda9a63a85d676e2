//! Durable store contracts.
//!
//! The shared database is the single point of truth for records, the
//! pending queue, blocks, leaves, leases, and cursors. Implementations live
//! in `arx-storage`; in-memory doubles live in `arx-test-utils`.

use arx_types::block::{Block, BlockQuery, BlockRecords};
use arx_types::cluster::LeadershipLease;
use arx_types::commitment::{AggregatorRecord, Commitment, LeafPath, RequestId, SmtLeaf};
use arx_types::error::StorageError;
use async_trait::async_trait;
use std::time::Duration;

/// Content-addressed store of accepted commitments keyed by request
/// fingerprint. Writes are insert-if-absent: the first record for a
/// fingerprint wins and is never overwritten.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts if absent. Silent success on collision preserves the first
    /// write.
    async fn put(&self, record: &AggregatorRecord) -> Result<(), StorageError>;

    /// Bulk insert-if-absent for the subset that was absent.
    async fn put_batch(&self, records: &[AggregatorRecord]) -> Result<(), StorageError>;

    async fn get(&self, request_id: &RequestId) -> Result<Option<AggregatorRecord>, StorageError>;

    /// Fetches the stored records for the given fingerprints; missing ids
    /// are omitted and order is unspecified.
    async fn get_by_request_ids(
        &self,
        ids: &[RequestId],
    ) -> Result<Vec<AggregatorRecord>, StorageError>;
}

/// Durable FIFO of validated commitments awaiting the next block.
///
/// Crash recovery contract: a crash between `drain_for_block` and
/// `confirm_block_processed` leaves entries in PROCESSING; the next leader
/// activation calls `recover_orphaned` so a fresh drain includes them
/// again. At-least-once inclusion combined with record-store uniqueness
/// yields exactly-once commitment.
#[async_trait]
pub trait PendingQueue: Send + Sync {
    /// Appends a PENDING entry. Deduplication is not required here.
    async fn put(&self, commitment: &Commitment) -> Result<(), StorageError>;

    /// Atomically moves all PENDING entries to PROCESSING and returns them
    /// in insertion order. PROCESSING entries are not returned again.
    async fn drain_for_block(&self) -> Result<Vec<Commitment>, StorageError>;

    /// Deletes all PROCESSING entries.
    async fn confirm_block_processed(&self) -> Result<(), StorageError>;

    /// Flips PROCESSING entries left behind by a crashed or demoted leader
    /// back to PENDING. Returns how many were recovered.
    async fn recover_orphaned(&self) -> Result<u64, StorageError>;
}

/// Sequential block objects plus the per-block fingerprint lists.
///
/// `append` writes the block and its record list in one transaction:
/// neither becomes visible without the other, and an index that is no
/// longer `next_block_number()` at commit time is rejected with
/// `StorageError::Conflict`. Concurrent leaders race on that conflict, so
/// duplicate blocks cannot exist.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// `1 + max(index)`, or 1 when the chain is empty.
    async fn next_block_number(&self) -> Result<u64, StorageError>;

    async fn append(&self, block: &Block, records: &BlockRecords) -> Result<(), StorageError>;

    async fn get(&self, query: BlockQuery) -> Result<Option<Block>, StorageError>;

    async fn get_records(&self, block_number: u64) -> Result<Option<BlockRecords>, StorageError>;
}

/// One page of the leaf store's insertion-ordered replay stream.
#[derive(Debug, Clone)]
pub struct LeafChunk {
    pub leaves: Vec<SmtLeaf>,
    /// Replay cursor to pass to the next `scan_chunk` call; `None` when the
    /// page was empty (end of stream).
    pub last_sequence: Option<u64>,
}

/// Durable persistence of every leaf ever inserted.
///
/// The store preserves a per-leaf insertion sequence so that replaying
/// `scan_chunk` pages in order and feeding each page to `add_leaves`
/// reconstructs the tree the original insertion order built.
#[async_trait]
pub trait LeafStore: Send + Sync {
    /// Insert-if-absent keyed by path; an identical re-insert is a no-op.
    async fn put_batch(&self, leaves: &[SmtLeaf]) -> Result<(), StorageError>;

    /// Fetches leaves by path; missing paths are omitted.
    async fn get_by_paths(&self, paths: &[LeafPath]) -> Result<Vec<SmtLeaf>, StorageError>;

    /// Returns up to `limit` leaves with insertion sequence strictly above
    /// `after_sequence`, in sequence order.
    async fn scan_chunk(&self, after_sequence: u64, limit: u32)
        -> Result<LeafChunk, StorageError>;
}

/// The single-row fencing lock behind leader election. All conditional
/// writes compare against the database clock, so replicas with skewed
/// clocks cannot steal an unexpired lease.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Creates or takes over the lease if it is absent or expired. Returns
    /// whether `holder_id` now holds it.
    async fn try_acquire(&self, holder_id: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// Extends the lease if `holder_id` still holds it unexpired. A `false`
    /// return means the lease was lost.
    async fn heartbeat(&self, holder_id: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// Best-effort release on shutdown; only deletes our own row.
    async fn release(&self, holder_id: &str) -> Result<(), StorageError>;

    async fn current(&self) -> Result<Option<LeadershipLease>, StorageError>;
}

/// Durable change-feed positions, one per stream id.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, stream_id: &str) -> Result<Option<u64>, StorageError>;
    async fn save(&self, stream_id: &str, position: u64) -> Result<(), StorageError>;
    async fn clear(&self, stream_id: &str) -> Result<(), StorageError>;
}
