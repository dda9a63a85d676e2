//! The trust-anchor client contract.

use arx_types::error::AnchorError;
use arx_types::hash::DataHash;
use async_trait::async_trait;

/// What the external ledger returns for a notarized root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorReceipt {
    /// Opaque transaction proof bytes, stored verbatim in the block.
    pub proof: Vec<u8>,
    /// The root submitted on the immediately prior successful call, or
    /// `None` on the very first call. Becomes the next block's
    /// `previousBlockHash`.
    pub previous_root_witness: Option<DataHash>,
    /// The external ledger's notion of time, milliseconds since epoch.
    /// Used verbatim as the block timestamp.
    pub timestamp: u64,
}

/// Submits SMT roots to the external trust-anchor ledger.
///
/// Implementations are expected to be slow (seconds), may fail
/// transiently, and are externally total-ordered. Submitting the same root
/// again after a failed round is safe and expected.
#[async_trait]
pub trait TrustAnchorClient: Send + Sync {
    async fn submit_root_hash(&self, root: &DataHash) -> Result<AnchorReceipt, AnchorError>;
}
