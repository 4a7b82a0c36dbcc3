//! Basic types of the Merkle tree: nodes, the sorted index, tree metadata.

use serde::{Deserialize, Serialize};
use vault_basic_types::{ContentHash, EpochMillis, TreeId};

use crate::hasher::HashTree;

/// On-disk format versions the codec understands. Trees always save as
/// [`TreeVersion::CURRENT`]; older versions load transparently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum TreeVersion {
    V2 = 2,
    V3 = 3,
    V4 = 4,
}

impl TreeVersion {
    pub const CURRENT: Self = Self::V4;

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            4 => Some(Self::V4),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// A node of the binary tree. Leaves carry a file; interior nodes compose
/// their children.
#[derive(Debug, Clone, PartialEq)]
pub struct MerkleNode {
    pub hash: ContentHash,
    /// Set on leaves only; a storage-relative path with `/` separators.
    pub file_name: Option<String>,
    /// Total nodes in the subtree including self; 1 for leaves.
    pub node_count: u32,
    /// Total leaves in the subtree; 1 for leaves.
    pub leaf_count: u32,
    /// Sum of file lengths below; 0 for tombstoned leaves.
    pub size: u64,
    /// Last-modified timestamp of the underlying file; leaves only.
    pub last_modified: EpochMillis,
    /// Tombstone flag; leaves only.
    pub is_deleted: bool,
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    pub(crate) fn leaf(file: &FileEntry) -> Self {
        Self {
            hash: file.hash,
            file_name: Some(file.name.clone()),
            node_count: 1,
            leaf_count: 1,
            size: file.length,
            last_modified: file.last_modified,
            is_deleted: false,
            left: None,
            right: None,
        }
    }

    pub(crate) fn branch(
        left: Box<MerkleNode>,
        right: Box<MerkleNode>,
        hasher: &dyn HashTree,
    ) -> Self {
        let mut node = Self {
            hash: ContentHash::zero(),
            file_name: None,
            node_count: 0,
            leaf_count: 0,
            size: 0,
            last_modified: 0,
            is_deleted: false,
            left: Some(left),
            right: Some(right),
        };
        node.recompute(hasher);
        node
    }

    pub fn is_leaf(&self) -> bool {
        self.node_count == 1
    }

    /// Recomputes hash, size and counts from the children. No-op on leaves.
    pub(crate) fn recompute(&mut self, hasher: &dyn HashTree) {
        let (Some(left), Some(right)) = (self.left.as_deref(), self.right.as_deref()) else {
            return;
        };
        self.hash = hasher.hash_branch(&left.hash, &right.hash);
        self.size = left.size + right.size;
        self.node_count = 1 + left.node_count + right.node_count;
        self.leaf_count = left.leaf_count + right.leaf_count;
    }

    /// Recomputes hash and size only; used along the path after a leaf
    /// mutation that cannot change counts.
    pub(crate) fn recompute_hash_and_size(&mut self, hasher: &dyn HashTree) {
        let (Some(left), Some(right)) = (self.left.as_deref(), self.right.as_deref()) else {
            return;
        };
        self.hash = hasher.hash_branch(&left.hash, &right.hash);
        self.size = left.size + right.size;
    }
}

/// Entry of the sorted index: maps a file name to its leaf, independent of
/// the tree shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNodeRef {
    pub file_name: String,
    /// Insertion-order sequence number among the leaves of this tree.
    pub file_index: u32,
    pub is_deleted: bool,
}

/// Aggregate metadata persisted with the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMetadata {
    pub id: TreeId,
    pub total_nodes: u32,
    pub total_files: u32,
    pub total_size: u64,
}

impl TreeMetadata {
    pub(crate) fn empty(id: TreeId) -> Self {
        Self {
            id,
            total_nodes: 0,
            total_files: 0,
            total_size: 0,
        }
    }
}

/// A file as the tree ingests it: content already hashed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub hash: ContentHash,
    pub length: u64,
    pub last_modified: EpochMillis,
}

/// The in-memory Merkle tree: the node graph, the parallel sorted index and
/// aggregate metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct MerkleTree {
    pub(crate) root: Option<Box<MerkleNode>>,
    pub(crate) sorted_node_refs: Vec<MerkleNodeRef>,
    pub(crate) metadata: TreeMetadata,
    /// Opaque application payload; round-trips through the codec untouched.
    pub(crate) database_metadata: Option<bson::Document>,
    pub(crate) version: TreeVersion,
}

impl MerkleTree {
    /// Creates an empty tree with the given identity at the current format
    /// version.
    pub fn create(id: TreeId) -> Self {
        Self {
            root: None,
            sorted_node_refs: Vec::new(),
            metadata: TreeMetadata::empty(id),
            database_metadata: None,
            version: TreeVersion::CURRENT,
        }
    }

    pub(crate) fn from_parts(
        root: Option<Box<MerkleNode>>,
        sorted_node_refs: Vec<MerkleNodeRef>,
        metadata: TreeMetadata,
        database_metadata: Option<bson::Document>,
        version: TreeVersion,
    ) -> Self {
        Self {
            root,
            sorted_node_refs,
            metadata,
            database_metadata,
            version,
        }
    }

    pub fn root(&self) -> Option<&MerkleNode> {
        self.root.as_deref()
    }

    pub fn root_hash(&self) -> Option<ContentHash> {
        self.root.as_deref().map(|root| root.hash)
    }

    pub fn metadata(&self) -> &TreeMetadata {
        &self.metadata
    }

    pub fn version(&self) -> TreeVersion {
        self.version
    }

    pub fn sorted_node_refs(&self) -> &[MerkleNodeRef] {
        &self.sorted_node_refs
    }

    pub fn database_metadata(&self) -> Option<&bson::Document> {
        self.database_metadata.as_ref()
    }

    pub fn set_database_metadata(&mut self, payload: Option<bson::Document>) {
        self.database_metadata = payload;
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Keeps the aggregate metadata in sync with the root after a mutation.
    pub(crate) fn sync_metadata(&mut self) {
        match self.root.as_deref() {
            Some(root) => {
                self.metadata.total_nodes = root.node_count;
                self.metadata.total_files = root.leaf_count;
                self.metadata.total_size = root.size;
            }
            None => {
                self.metadata.total_nodes = 0;
                self.metadata.total_files = 0;
                self.metadata.total_size = 0;
            }
        }
    }
}
