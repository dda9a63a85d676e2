//! The block-records change feed.
//!
//! A durable tail over the block-records table that emits each block's
//! fingerprint list in commit order. Consumers drive it pull-style: wait
//! for an append signal, then page events after their cursor. Resume state
//! lives in a [`crate::store::CursorStore`], persisted only after a
//! successful apply.

use arx_types::commitment::RequestId;
use arx_types::error::StorageError;
use async_trait::async_trait;
use std::time::Duration;

/// One appended block's record list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEvent {
    pub block_number: u64,
    pub request_ids: Vec<RequestId>,
}

/// The durable tail. `poll_after` and `head` are plain reads; transport
/// errors surface as `StorageError::Backend` and callers reconnect with
/// bounded backoff.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Events with block number strictly above `cursor`, oldest first, at
    /// most `limit`.
    async fn poll_after(&self, cursor: u64, limit: u32) -> Result<Vec<FeedEvent>, StorageError>;

    /// The newest emitted block number, or 0 when nothing was emitted yet.
    /// A fresh subscriber without a cursor starts here, so unresumed
    /// subscribers do not replay prehistory.
    async fn head(&self) -> Result<u64, StorageError>;

    /// Resolves when new events may be available or `timeout` elapses.
    /// Spurious wakeups are fine; the consumer polls after every return.
    async fn wait_for_append(&self, timeout: Duration) -> Result<(), StorageError>;
}
