//! Boot-time SMT reload.
//!
//! Every replica rebuilds the whole tree from the leaf store at startup,
//! in insertion-sequence order, before serving requests or consuming the
//! change feed. This is what keeps followers correct even after the feed
//! reports lost history: whatever the feed cannot replay, the reload
//! already covered.

use arx_api::store::LeafStore;
use arx_smt::SparseMerkleTree;
use arx_types::error::SyncError;
use tokio::sync::RwLock;

/// Leaves per reload page.
pub const RELOAD_CHUNK: u32 = 1000;

/// Streams every stored leaf into the tree. Returns the number of leaves
/// applied.
pub async fn reload_smt(
    leaves: &dyn LeafStore,
    smt: &RwLock<SparseMerkleTree>,
) -> Result<u64, SyncError> {
    let mut after_sequence = 0u64;
    let mut total = 0u64;
    loop {
        let chunk = leaves.scan_chunk(after_sequence, RELOAD_CHUNK).await?;
        let Some(last) = chunk.last_sequence else {
            break;
        };
        total += chunk.leaves.len() as u64;
        smt.write().await.add_leaves(chunk.leaves)?;
        after_sequence = last;
    }
    tracing::info!(target: "reload", leaves = total, "SMT reloaded from leaf store");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arx_test_utils::{CommitmentFactory, InMemoryBackend};
    use std::sync::Arc;

    #[tokio::test]
    async fn reload_reproduces_the_original_root() {
        let backend = Arc::new(InMemoryBackend::new());
        let factory = CommitmentFactory::random();

        let original = Arc::new(RwLock::new(SparseMerkleTree::new()));
        // More leaves than one page so pagination is exercised.
        for i in 0..2_500u32 {
            let leaf = factory
                .commitment(format!("s{i}").as_bytes(), format!("t{i}").as_bytes())
                .to_leaf();
            backend.put_batch(&[leaf.clone()]).await.unwrap();
            original.write().await.add_leaves([leaf]).unwrap();
        }

        let reloaded = RwLock::new(SparseMerkleTree::new());
        let total = reload_smt(backend.as_ref(), &reloaded).await.unwrap();
        assert_eq!(total, 2_500);
        assert_eq!(
            reloaded.read().await.root_hash(),
            original.read().await.root_hash()
        );
    }

    #[tokio::test]
    async fn reload_of_empty_store_is_empty_tree() {
        let backend = Arc::new(InMemoryBackend::new());
        let smt = RwLock::new(SparseMerkleTree::new());
        let total = reload_smt(backend.as_ref(), &smt).await.unwrap();
        assert_eq!(total, 0);
        assert!(smt.read().await.is_empty());
    }
}
