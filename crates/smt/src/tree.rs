//! The tree itself.

use arx_api::proof::{
    branch_digest, digest_to_hash, leaf_subtree_digest, MerklePath, PathTerminal, SiblingDigest,
    EMPTY_SUBTREE_DIGEST,
};
use arx_types::commitment::{LeafPath, SmtLeaf};
use arx_types::error::SmtError;
use arx_types::hash::DataHash;

enum Node {
    Empty,
    Leaf {
        path: LeafPath,
        value: DataHash,
        digest: [u8; 32],
    },
    Branch {
        left: Box<Node>,
        right: Box<Node>,
        /// `None` while dirty; recomputed before any public mutator
        /// returns.
        digest: Option<[u8; 32]>,
    },
}

impl Node {
    fn new_leaf(path: LeafPath, value: DataHash) -> Self {
        let digest = leaf_subtree_digest(&path, &value);
        Node::Leaf {
            path,
            value,
            digest,
        }
    }

    /// Digest of a node in a clean tree. Dirty branches cannot be observed
    /// through the public API; if one ever were, the empty digest keeps
    /// verification failing loudly rather than panicking.
    fn clean_digest(&self) -> [u8; 32] {
        match self {
            Node::Empty => EMPTY_SUBTREE_DIGEST,
            Node::Leaf { digest, .. } => *digest,
            Node::Branch { digest, .. } => digest.unwrap_or(EMPTY_SUBTREE_DIGEST),
        }
    }
}

/// What a single insertion did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The identical `(path, value)` pair was already present; legal no-op.
    DuplicateNoop,
}

/// Tally of a batch insertion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub added: usize,
    pub duplicates: usize,
}

/// A compressed sparse Merkle tree over 256-bit paths.
pub struct SparseMerkleTree {
    root: Node,
    leaf_count: usize,
}

impl Default for SparseMerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseMerkleTree {
    pub fn new() -> Self {
        Self {
            root: Node::Empty,
            leaf_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.leaf_count
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Inserts one leaf. Re-adding the identical `(path, value)` pair is a
    /// no-op; the same path with a different value is an invariant
    /// violation surfaced as [`SmtError::LeafConflict`].
    pub fn add_leaf(&mut self, path: LeafPath, value: DataHash) -> Result<AddOutcome, SmtError> {
        let outcome = insert(&mut self.root, 0, path, value)?;
        if outcome == AddOutcome::Added {
            self.leaf_count += 1;
        }
        rehash(&mut self.root);
        Ok(outcome)
    }

    /// Batch insert, semantically equivalent to sequential [`add_leaf`]
    /// calls in list order; hash recomputation is deferred to the end of
    /// the batch. A conflict aborts mid-batch with earlier insertions
    /// applied; callers treat the tree as poisoned and restart into a
    /// full reload.
    ///
    /// [`add_leaf`]: SparseMerkleTree::add_leaf
    pub fn add_leaves(
        &mut self,
        leaves: impl IntoIterator<Item = SmtLeaf>,
    ) -> Result<BatchOutcome, SmtError> {
        let mut outcome = BatchOutcome::default();
        let result = (|| {
            for leaf in leaves {
                match insert(&mut self.root, 0, leaf.path, leaf.value)? {
                    AddOutcome::Added => {
                        self.leaf_count += 1;
                        outcome.added += 1;
                    }
                    AddOutcome::DuplicateNoop => outcome.duplicates += 1,
                }
            }
            Ok(())
        })();
        rehash(&mut self.root);
        result.map(|()| outcome)
    }

    /// The current root digest, tagged.
    pub fn root_hash(&self) -> DataHash {
        digest_to_hash(self.root.clean_digest())
    }

    /// A verifiable Merkle path for `query`, whether or not the leaf
    /// exists; a non-inclusion path is valid.
    pub fn get_path(&self, query: &LeafPath) -> MerklePath {
        let mut steps = Vec::new();
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                Node::Empty => {
                    return MerklePath {
                        root: self.root_hash(),
                        steps,
                        terminal: PathTerminal::Empty,
                    }
                }
                Node::Leaf { path, value, .. } => {
                    return MerklePath {
                        root: self.root_hash(),
                        steps,
                        terminal: PathTerminal::Leaf {
                            path: *path,
                            value: value.clone(),
                        },
                    }
                }
                Node::Branch { left, right, .. } => {
                    if query.bit(depth) {
                        steps.push(SiblingDigest(left.clean_digest()));
                        node = right;
                    } else {
                        steps.push(SiblingDigest(right.clean_digest()));
                        node = left;
                    }
                    depth += 1;
                }
            }
        }
    }
}

fn insert(
    node: &mut Node,
    depth: usize,
    path: LeafPath,
    value: DataHash,
) -> Result<AddOutcome, SmtError> {
    match node {
        Node::Empty => {
            *node = Node::new_leaf(path, value);
            Ok(AddOutcome::Added)
        }
        Node::Leaf {
            path: existing_path,
            value: existing_value,
            ..
        } => {
            if *existing_path == path {
                return if *existing_value == value {
                    Ok(AddOutcome::DuplicateNoop)
                } else {
                    Err(SmtError::LeafConflict {
                        path: path.to_hex(),
                    })
                };
            }
            // Split: push the resident leaf down, then descend for the new
            // one. Paths are distinct, so the recursion bottoms out at the
            // first differing bit.
            let resident_path = *existing_path;
            let resident_value = existing_value.clone();
            *node = Node::Branch {
                left: Box::new(Node::Empty),
                right: Box::new(Node::Empty),
                digest: None,
            };
            insert(node, depth, resident_path, resident_value)?;
            insert(node, depth, path, value)
        }
        Node::Branch {
            left,
            right,
            digest,
        } => {
            *digest = None;
            let child = if path.bit(depth) { right } else { left };
            insert(child, depth + 1, path, value)
        }
    }
}

fn rehash(node: &mut Node) -> [u8; 32] {
    match node {
        Node::Empty => EMPTY_SUBTREE_DIGEST,
        Node::Leaf { digest, .. } => *digest,
        Node::Branch {
            left,
            right,
            digest,
        } => {
            if let Some(d) = digest {
                *d
            } else {
                let l = rehash(left);
                let r = rehash(right);
                let d = branch_digest(&l, &r);
                *digest = Some(d);
                d
            }
        }
    }
}
