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

//! # Arx SMT engine
//!
//! A compressed sparse Merkle tree over the 256-bit key space. Leaf values
//! are opaque digests; the tree binds each value to its full path, so a
//! subtree holding one leaf hashes identically at any depth and proofs
//! stay short. Digest rules live in [`arx_api::proof`], shared with the
//! standalone path verifier.
//!
//! Mutation is single-writer by contract: the leader's round task or the
//! follower's apply task holds the tree exclusively while inserting, and
//! batch insertion defers hash recomputation until the batch completes.
//! Every public mutator returns with all digests recomputed, so reads
//! (`root_hash`, `get_path`) are immutable and cheap.

mod tree;

pub use tree::{AddOutcome, BatchOutcome, SparseMerkleTree};
