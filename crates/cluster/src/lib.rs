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

//! # Arx cluster coordination
//!
//! Two long-running tasks per replica:
//!
//! - the leadership coordinator, which drives the fencing lease in the
//!   shared database and broadcasts the replica's role on a watch channel;
//! - the follower SMT synchronizer, which tails the block-records change
//!   feed and applies each block's leaves so a follower's in-memory tree
//!   stays byte-identical to the leader's.
//!
//! A replica is exactly one of leader or follower at any instant; the
//! round timer and the synchronizer both observe the same role channel, so
//! their tree mutations never interleave.

/// Leader election over the shared-database lease.
pub mod leadership;
/// The follower SMT synchronizer.
pub mod sync;

pub use leadership::{ElectionConfig, LeadershipCoordinator};
pub use sync::{SmtSynchronizer, SynchronizerConfig};
