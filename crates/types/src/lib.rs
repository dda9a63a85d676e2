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

//! # Arx core types
//!
//! Data model shared by every Arx crate: tagged digests and their imprint
//! encoding, commitments and their stored record form, blocks, leadership
//! leases, change-feed cursors, the error taxonomy, and node configuration.

/// Blocks, block record lists, and block lookup queries.
pub mod block;
/// Leadership leases, replica roles, and change-feed cursors.
pub mod cluster;
/// Commitments, authenticators, aggregator records, and SMT leaves.
pub mod commitment;
/// Node configuration with defaults mirroring the deployment surface.
pub mod config;
/// Error types for every subsystem, each with a stable string code.
pub mod error;
/// Tagged digests and the imprint wire encoding.
pub mod hash;

/// A curated set of the most commonly used types.
pub mod prelude {
    pub use crate::block::{Block, BlockQuery, BlockRecords};
    pub use crate::cluster::{LeadershipLease, ReplicaRole, ResumeCursor};
    pub use crate::commitment::{
        AggregatorRecord, Authenticator, Commitment, LeafPath, RequestId, SmtLeaf,
        ValidationStatus,
    };
    pub use crate::error::{
        AnchorError, ElectionError, ErrorCode, RoundError, SmtError, StorageError,
    };
    pub use crate::hash::{DataHash, HashAlgorithm};
}
