//! Error types for every Arx subsystem.
//!
//! Transient I/O failures are retried by the owning task and surface here
//! only when a round or sync step must abort. Invariant violations are
//! fatal by design: the process exits so the orchestrator restarts it and
//! the SMT is rebuilt from the leaf store.

use thiserror::Error;

/// Assigns a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// The unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors from the durable storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A generic error from the underlying database backend.
    #[error("backend error: {0}")]
    Backend(String),
    /// Serializing a value for storage failed.
    #[error("encode error: {0}")]
    Encode(String),
    /// Deserializing a stored value failed.
    #[error("decode error: {0}")]
    Decode(String),
    /// The requested item was not found.
    #[error("not found")]
    NotFound,
    /// A write conflicted with concurrent state, e.g. a block index that is
    /// no longer the next one.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::Encode(_) => "STORAGE_ENCODE_ERROR",
            Self::Decode(_) => "STORAGE_DECODE_ERROR",
            Self::NotFound => "STORAGE_NOT_FOUND",
            Self::Conflict(_) => "STORAGE_CONFLICT",
        }
    }
}

/// Errors from the in-memory sparse Merkle tree.
#[derive(Debug, Error)]
pub enum SmtError {
    /// A leaf already exists at this path with a different value. The only
    /// legal re-add is the identical `(path, value)` pair.
    #[error("leaf conflict at path {path}: existing value differs")]
    LeafConflict {
        /// Hex of the conflicting 256-bit path.
        path: String,
    },
}

impl ErrorCode for SmtError {
    fn code(&self) -> &'static str {
        match self {
            Self::LeafConflict { .. } => "SMT_LEAF_CONFLICT",
        }
    }
}

/// Errors from the trust-anchor client.
#[derive(Debug, Error)]
pub enum AnchorError {
    /// The submission did not complete; retrying with the same root next
    /// round is safe.
    #[error("transient anchor failure: {0}")]
    Transient(String),
    /// The anchor ledger refused the submission.
    #[error("anchor rejected submission: {0}")]
    Rejected(String),
}

impl ErrorCode for AnchorError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transient(_) => "ANCHOR_TRANSIENT",
            Self::Rejected(_) => "ANCHOR_REJECTED",
        }
    }
}

/// Errors aborting a block-production round. The pending queue keeps its
/// PROCESSING entries; the next round (or the next leader) retries.
#[derive(Debug, Error)]
pub enum RoundError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Smt(#[from] SmtError),
    #[error(transparent)]
    Anchor(#[from] AnchorError),
    /// Another replica appended this block number first. Harmless: the
    /// losing round aborts and the queue is re-drained later.
    #[error("block {expected} was appended by another writer")]
    IndexTaken { expected: u64 },
}

impl ErrorCode for RoundError {
    fn code(&self) -> &'static str {
        match self {
            Self::Storage(e) => e.code(),
            Self::Smt(e) => e.code(),
            Self::Anchor(e) => e.code(),
            Self::IndexTaken { .. } => "ROUND_INDEX_TAKEN",
        }
    }
}

/// Errors from the leader-election task.
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ErrorCode for ElectionError {
    fn code(&self) -> &'static str {
        match self {
            Self::Storage(e) => e.code(),
        }
    }
}

/// Errors from the follower SMT synchronizer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Smt(#[from] SmtError),
    /// Leaves for an emitted block never appeared in the leaf store. Fatal:
    /// the process must restart and reload the SMT in full.
    #[error("block {block_number}: {got} of {expected} leaves found after retries")]
    MissingLeaves {
        block_number: u64,
        expected: usize,
        got: usize,
    },
}

impl ErrorCode for SyncError {
    fn code(&self) -> &'static str {
        match self {
            Self::Storage(e) => e.code(),
            Self::Smt(e) => e.code(),
            Self::MissingLeaves { .. } => "SYNC_MISSING_LEAVES",
        }
    }
}

/// Errors raised while loading or validating node configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read configuration: {0}")]
    Io(String),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "CONFIG_INVALID",
            Self::Io(_) => "CONFIG_IO",
        }
    }
}
