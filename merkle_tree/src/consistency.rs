//! Consistency verification for the Merkle tree.

use std::cmp::Ordering;

use vault_basic_types::ContentHash;
use vault_utils::collate::collate_paths;

use crate::{
    hasher::{HashTree, Sha256Hasher},
    types::{MerkleNode, MerkleTree},
};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConsistencyError {
    #[error("metadata says the tree has {expected} nodes, but it actually has {actual}")]
    TotalNodesMismatch { expected: u32, actual: u32 },
    #[error("metadata says the tree has {expected} leaves, but it actually has {actual}")]
    TotalFilesMismatch { expected: u32, actual: u32 },
    #[error("metadata says the tree holds {expected} bytes, but it actually holds {actual}")]
    TotalSizeMismatch { expected: u64, actual: u64 },
    #[error("interior node is missing a child")]
    MissingChild,
    #[error("interior node carries a file name `{0}`")]
    NamedInternalNode(String),
    #[error("leaf node has no file name")]
    UnnamedLeaf,
    #[error(
        "interior node hash does not commit to its children: expected {expected}, got {actual}"
    )]
    BranchHashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },
    #[error("interior node size {actual} is not the sum {expected} of its children")]
    BranchSizeMismatch { expected: u64, actual: u64 },
    #[error("interior node counts disagree with its children")]
    BranchCountMismatch,
    #[error("tombstoned leaf `{0}` does not carry the tombstone hash")]
    TombstoneHashMismatch(String),
    #[error("tombstoned leaf `{0}` has non-zero size")]
    TombstoneSizeMismatch(String),
    #[error("sorted index is not strictly ordered at `{0}`")]
    IndexNotSorted(String),
    #[error("sorted index entry `{0}` has no matching leaf")]
    MissingLeaf(String),
    #[error("sorted index entry `{0}` disagrees with its leaf about deletion")]
    DeletionFlagMismatch(String),
    #[error("tree has {leaves} leaves but {refs} index entries")]
    IndexSizeMismatch { leaves: u32, refs: usize },
}

impl MerkleTree {
    /// Verifies the structural invariants of the tree: hash and size
    /// composition of every interior node, tombstone shape, metadata totals,
    /// and agreement between the sorted index and the leaves.
    ///
    /// # Errors
    ///
    /// Returns the first violation encountered.
    pub fn verify_consistency(&self) -> Result<(), ConsistencyError> {
        let hasher = Sha256Hasher;
        let (actual_nodes, actual_files, actual_size) = match self.root() {
            Some(root) => {
                verify_node(root, &hasher)?;
                (root.node_count, root.leaf_count, root.size)
            }
            None => (0, 0, 0),
        };

        let metadata = self.metadata();
        if metadata.total_nodes != actual_nodes {
            return Err(ConsistencyError::TotalNodesMismatch {
                expected: metadata.total_nodes,
                actual: actual_nodes,
            });
        }
        if metadata.total_files != actual_files {
            return Err(ConsistencyError::TotalFilesMismatch {
                expected: metadata.total_files,
                actual: actual_files,
            });
        }
        if metadata.total_size != actual_size {
            return Err(ConsistencyError::TotalSizeMismatch {
                expected: metadata.total_size,
                actual: actual_size,
            });
        }

        let refs = self.sorted_node_refs();
        for window in refs.windows(2) {
            if collate_paths(&window[0].file_name, &window[1].file_name) != Ordering::Less {
                return Err(ConsistencyError::IndexNotSorted(
                    window[1].file_name.clone(),
                ));
            }
        }
        if refs.len() != actual_files as usize {
            return Err(ConsistencyError::IndexSizeMismatch {
                leaves: actual_files,
                refs: refs.len(),
            });
        }
        for node_ref in refs {
            let leaf = self
                .find_file_node_with_deletion_status(&node_ref.file_name, true)
                .ok_or_else(|| ConsistencyError::MissingLeaf(node_ref.file_name.clone()))?;
            if leaf.is_deleted != node_ref.is_deleted {
                return Err(ConsistencyError::DeletionFlagMismatch(
                    node_ref.file_name.clone(),
                ));
            }
        }
        Ok(())
    }
}

fn verify_node(node: &MerkleNode, hasher: &Sha256Hasher) -> Result<(), ConsistencyError> {
    if node.is_leaf() {
        let Some(file_name) = &node.file_name else {
            return Err(ConsistencyError::UnnamedLeaf);
        };
        if node.is_deleted {
            if node.hash != hasher.tombstone_hash(file_name) {
                return Err(ConsistencyError::TombstoneHashMismatch(file_name.clone()));
            }
            if node.size != 0 {
                return Err(ConsistencyError::TombstoneSizeMismatch(file_name.clone()));
            }
        }
        return Ok(());
    }

    if let Some(file_name) = &node.file_name {
        return Err(ConsistencyError::NamedInternalNode(file_name.clone()));
    }
    let (Some(left), Some(right)) = (node.left.as_deref(), node.right.as_deref()) else {
        return Err(ConsistencyError::MissingChild);
    };
    verify_node(left, hasher)?;
    verify_node(right, hasher)?;

    let expected_hash = hasher.hash_branch(&left.hash, &right.hash);
    if node.hash != expected_hash {
        return Err(ConsistencyError::BranchHashMismatch {
            expected: expected_hash,
            actual: node.hash,
        });
    }
    let expected_size = left.size + right.size;
    if node.size != expected_size {
        return Err(ConsistencyError::BranchSizeMismatch {
            expected: expected_size,
            actual: node.size,
        });
    }
    let counts_match = node.node_count == 1 + left.node_count + right.node_count
        && node.leaf_count == left.leaf_count + right.leaf_count;
    if !counts_match {
        return Err(ConsistencyError::BranchCountMismatch);
    }
    Ok(())
}
