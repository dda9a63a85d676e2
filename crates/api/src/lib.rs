#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]

//! # Arx API
//!
//! Core traits and interfaces for the Arx commitment aggregator. This crate
//! defines the stable contract between the engine, the storage backend, the
//! cluster coordinator, and the RPC gateway.

/// The trust-anchor client contract.
pub mod anchor;
/// The block-records change feed consumed by followers.
pub mod feed;
/// Merkle paths, their verification, and inclusion proofs.
pub mod proof;
/// The aggregator's request-facing surface, consumed by the gateway.
pub mod rpc;
/// Durable store contracts: records, pending queue, blocks, leaves, leases,
/// resume cursors.
pub mod store;

/// A curated set of the most commonly used traits and types.
pub mod prelude {
    pub use crate::anchor::{AnchorReceipt, TrustAnchorClient};
    pub use crate::feed::{ChangeFeed, FeedEvent};
    pub use crate::proof::{InclusionProof, MerklePath, PathTerminal, PathVerdict};
    pub use crate::rpc::{AggregatorApi, NodeHealth};
    pub use crate::store::{
        BlockStore, CursorStore, LeafChunk, LeafStore, LeaseStore, PendingQueue, RecordStore,
    };
}
