//! Structural comparison of two trees by file name and content hash.

use std::cmp::Ordering;
use std::collections::HashMap;

use vault_basic_types::ContentHash;
use vault_utils::collate::collate_paths;

use crate::types::{MerkleNodeRef, MerkleTree};

/// How often the progress callback fires, in compared index entries.
const PROGRESS_INTERVAL: u64 = 1_000;

/// Difference between two trees, keyed by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// Active in A, absent from B.
    pub only_in_a: Vec<String>,
    /// Active in B, absent from A.
    pub only_in_b: Vec<String>,
    /// Active in both with differing hashes.
    pub modified: Vec<String>,
    /// Tombstoned in A while still active in B.
    pub deleted: Vec<String>,
}

/// Compares two trees through their sorted indices. Entries tombstoned in `b`
/// are always skipped. The optional `progress` callback receives the running
/// count of compared entries every [`PROGRESS_INTERVAL`] entries.
pub fn compare_trees(
    a: &MerkleTree,
    b: &MerkleTree,
    mut progress: Option<&mut dyn FnMut(u64)>,
) -> TreeDiff {
    let hashes_a = leaf_hashes(a);
    let hashes_b = leaf_hashes(b);

    let mut diff = TreeDiff::default();
    let mut compared = 0_u64;
    let mut tick = |compared: &mut u64, progress: &mut Option<&mut dyn FnMut(u64)>| {
        *compared += 1;
        if *compared % PROGRESS_INTERVAL == 0 {
            if let Some(progress) = progress {
                progress(*compared);
            }
        }
    };

    // Both indices share one collation order, so a single merge walk visits
    // every name exactly once.
    let refs_a = a.sorted_node_refs();
    let refs_b = b.sorted_node_refs();
    let (mut i, mut j) = (0_usize, 0_usize);
    while i < refs_a.len() || j < refs_b.len() {
        let order = match (refs_a.get(i), refs_b.get(j)) {
            (Some(ref_a), Some(ref_b)) => collate_paths(&ref_a.file_name, &ref_b.file_name),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Less => {
                let ref_a = &refs_a[i];
                if !ref_a.is_deleted {
                    diff.only_in_a.push(ref_a.file_name.clone());
                }
                i += 1;
            }
            Ordering::Greater => {
                let ref_b = &refs_b[j];
                if !ref_b.is_deleted {
                    diff.only_in_b.push(ref_b.file_name.clone());
                }
                j += 1;
            }
            Ordering::Equal => {
                compare_entry(&refs_a[i], &refs_b[j], &hashes_a, &hashes_b, &mut diff);
                i += 1;
                j += 1;
            }
        }
        tick(&mut compared, &mut progress);
    }
    if let Some(progress) = progress.as_mut() {
        progress(compared);
    }
    diff
}

fn compare_entry(
    ref_a: &MerkleNodeRef,
    ref_b: &MerkleNodeRef,
    hashes_a: &HashMap<String, ContentHash>,
    hashes_b: &HashMap<String, ContentHash>,
    diff: &mut TreeDiff,
) {
    // A tombstone on the B side suppresses the entry entirely.
    if ref_b.is_deleted {
        return;
    }
    let name = &ref_a.file_name;
    if ref_a.is_deleted {
        diff.deleted.push(name.clone());
        return;
    }
    if hashes_a.get(name) != hashes_b.get(name) {
        diff.modified.push(name.clone());
    }
}

/// One traversal instead of a lookup per name; leaf resolution through the
/// tree is linear in the worst case.
fn leaf_hashes(tree: &MerkleTree) -> HashMap<String, ContentHash> {
    let mut hashes = HashMap::with_capacity(tree.sorted_node_refs().len());
    tree.traverse(&mut |node| {
        if let Some(file_name) = &node.file_name {
            hashes.insert(file_name.clone(), node.hash);
        }
        true
    });
    hashes
}
