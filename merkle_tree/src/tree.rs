//! Name-keyed operations on the Merkle tree: insertion, update, tombstoning,
//! hard deletion and lookups through the sorted index.

use vault_utils::collate::collate_paths;

use crate::{
    errors::TreeError,
    hasher::{HashTree, Sha256Hasher},
    types::{FileEntry, MerkleNode, MerkleNodeRef, MerkleTree},
};

impl MerkleTree {
    /// Inserts a new leaf for `file`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::DuplicateFileName`] if a leaf with this name is
    /// already indexed (including tombstoned leaves); use [`Self::upsert_file`]
    /// to absorb duplicates.
    pub fn add_file(&mut self, file: FileEntry) -> Result<(), TreeError> {
        let position = match self.ref_position(&file.name) {
            Ok(_) => return Err(TreeError::DuplicateFileName(file.name)),
            Err(position) => position,
        };
        let file_index = self.next_file_index();
        let leaf = MerkleNode::leaf(&file);
        self.root = Some(match self.root.take() {
            None => Box::new(leaf),
            Some(root) => insert_into(root, leaf, &Sha256Hasher),
        });
        self.sorted_node_refs.insert(
            position,
            MerkleNodeRef {
                file_name: file.name,
                file_index,
                is_deleted: false,
            },
        );
        self.sync_metadata();
        Ok(())
    }

    /// Updates the file in place when its name is already indexed, inserts a
    /// new leaf otherwise. Returns `true` when a leaf was added.
    pub fn upsert_file(&mut self, file: FileEntry) -> Result<bool, TreeError> {
        match self.ref_position(&file.name) {
            Ok(position) => {
                self.replace_leaf(position, &file);
                Ok(false)
            }
            Err(_) => {
                self.add_file(file)?;
                Ok(true)
            }
        }
    }

    /// Replaces the hash, length and timestamp of an existing leaf and
    /// recomputes hashes and sizes along the path to the root.
    ///
    /// Returns `false` when the name is not indexed.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::EmptyTree`] when the tree has no leaves at all.
    pub fn update_file(&mut self, file: &FileEntry) -> Result<bool, TreeError> {
        if self.root.is_none() {
            return Err(TreeError::EmptyTree);
        }
        match self.ref_position(&file.name) {
            Ok(position) => {
                self.replace_leaf(position, file);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Tombstones the leaf: keeps it in the tree and the index, but replaces
    /// its hash with a name-derived marker and zeroes its size. Returns
    /// `false` when the name is not indexed; tombstoning an already-deleted
    /// leaf leaves the tree unchanged.
    pub fn mark_file_as_deleted(&mut self, name: &str) -> bool {
        let Ok(position) = self.ref_position(name) else {
            return false;
        };
        let tombstone = Sha256Hasher.tombstone_hash(name);
        let root = self.root.as_mut().expect("indexed leaf implies a root");
        mutate_leaf(root, name, &Sha256Hasher, &mut |leaf| {
            leaf.is_deleted = true;
            leaf.hash = tombstone;
            leaf.size = 0;
        });
        self.sorted_node_refs[position].is_deleted = true;
        self.sync_metadata();
        true
    }

    /// Hard-deletes the named files by rebuilding the tree from the remaining
    /// active leaves in their current index order. The tree identity and the
    /// database metadata are preserved; counts and sizes are recomputed.
    ///
    /// # Errors
    ///
    /// Fails without touching the tree if `names` is empty, the tree is
    /// empty, or any name is unknown.
    pub fn delete_files<S: AsRef<str>>(&mut self, names: &[S]) -> Result<usize, TreeError> {
        if names.is_empty() {
            return Err(TreeError::NoFilesSpecified);
        }
        if self.root.is_none() {
            return Err(TreeError::EmptyTree);
        }
        for name in names {
            if self.ref_position(name.as_ref()).is_err() {
                return Err(TreeError::UnknownFile(name.as_ref().to_owned()));
            }
        }

        let mut survivors = Vec::with_capacity(self.sorted_node_refs.len());
        for node_ref in &self.sorted_node_refs {
            if node_ref.is_deleted {
                continue;
            }
            let deleted = names
                .iter()
                .any(|name| name.as_ref() == node_ref.file_name);
            if deleted {
                continue;
            }
            let leaf = find_leaf(self.root().expect("tree is non-empty"), &node_ref.file_name)
                .expect("sorted index references a missing leaf");
            survivors.push(FileEntry {
                name: node_ref.file_name.clone(),
                hash: leaf.hash,
                length: leaf.size,
                last_modified: leaf.last_modified,
            });
        }

        let mut rebuilt = MerkleTree::create(self.metadata.id);
        for file in survivors {
            rebuilt
                .add_file(file)
                .expect("sorted index contains duplicates");
        }
        self.root = rebuilt.root;
        self.sorted_node_refs = rebuilt.sorted_node_refs;
        self.sync_metadata();
        Ok(names.len())
    }

    /// Binary search of the sorted index.
    pub fn find_node_ref(&self, name: &str) -> Option<&MerkleNodeRef> {
        let position = self.ref_position(name).ok()?;
        Some(&self.sorted_node_refs[position])
    }

    /// Resolves the leaf node for an active file.
    pub fn find_file_node(&self, name: &str) -> Option<&MerkleNode> {
        self.find_file_node_with_deletion_status(name, false)
    }

    /// Resolves the leaf node; `include_deleted` also surfaces tombstones.
    pub fn find_file_node_with_deletion_status(
        &self,
        name: &str,
        include_deleted: bool,
    ) -> Option<&MerkleNode> {
        let node_ref = self.find_node_ref(name)?;
        if node_ref.is_deleted && !include_deleted {
            return None;
        }
        find_leaf(self.root()?, name)
    }

    /// Hash, length and timestamp of an active file.
    pub fn get_file_info(&self, name: &str) -> Option<FileEntry> {
        let leaf = self.find_file_node(name)?;
        Some(FileEntry {
            name: name.to_owned(),
            hash: leaf.hash,
            length: leaf.size,
            last_modified: leaf.last_modified,
        })
    }

    /// Names of all non-tombstoned files, in index order.
    pub fn get_active_files(&self) -> Vec<String> {
        self.sorted_node_refs
            .iter()
            .filter(|node_ref| !node_ref.is_deleted)
            .map(|node_ref| node_ref.file_name.clone())
            .collect()
    }

    /// Pre-order traversal; the visitor returns `false` to stop.
    pub fn traverse(&self, visit: &mut dyn FnMut(&MerkleNode) -> bool) {
        if let Some(root) = self.root() {
            traverse_node(root, visit);
        }
    }

    fn ref_position(&self, name: &str) -> Result<usize, usize> {
        self.sorted_node_refs
            .binary_search_by(|node_ref| collate_paths(&node_ref.file_name, name))
    }

    /// Next insertion-order sequence number: one past the highest index ever
    /// handed out (tombstones keep their refs, so the maximum survives
    /// soft deletion).
    fn next_file_index(&self) -> u32 {
        self.sorted_node_refs
            .iter()
            .map(|node_ref| node_ref.file_index)
            .max()
            .map_or(0, |max| max + 1)
    }

    fn replace_leaf(&mut self, ref_position: usize, file: &FileEntry) {
        let root = self.root.as_mut().expect("indexed leaf implies a root");
        mutate_leaf(root, &file.name, &Sha256Hasher, &mut |leaf| {
            leaf.hash = file.hash;
            leaf.size = file.length;
            leaf.last_modified = file.last_modified;
            // Fresh content revives a tombstoned leaf.
            leaf.is_deleted = false;
        });
        self.sorted_node_refs[ref_position].is_deleted = false;
        self.sync_metadata();
    }
}

/// The insertion rule keeping the tree approximately balanced: descend into
/// the right subtree while the left one holds more leaves, otherwise pair the
/// current subtree with the new leaf under a fresh parent.
fn insert_into(
    node: Box<MerkleNode>,
    leaf: MerkleNode,
    hasher: &dyn HashTree,
) -> Box<MerkleNode> {
    let descend = !node.is_leaf() && {
        let left = node.left.as_deref().expect("interior node missing left child");
        let right = node.right.as_deref().expect("interior node missing right child");
        left.leaf_count > right.leaf_count
    };
    if descend {
        let mut node = node;
        let right = node.right.take().expect("interior node missing right child");
        node.right = Some(insert_into(right, leaf, hasher));
        node.recompute(hasher);
        node
    } else {
        Box::new(MerkleNode::branch(node, Box::new(leaf), hasher))
    }
}

/// Applies `mutate` to the named leaf, recomputing hash and size along the
/// path back to `node`. Counts cannot change, so siblings stay untouched.
fn mutate_leaf(
    node: &mut MerkleNode,
    name: &str,
    hasher: &dyn HashTree,
    mutate: &mut dyn FnMut(&mut MerkleNode),
) -> bool {
    if node.is_leaf() {
        if node.file_name.as_deref() == Some(name) {
            mutate(node);
            return true;
        }
        return false;
    }
    let left = node.left.as_mut().expect("interior node missing left child");
    let mut changed = mutate_leaf(left, name, hasher, mutate);
    if !changed {
        let right = node.right.as_mut().expect("interior node missing right child");
        changed = mutate_leaf(right, name, hasher, mutate);
    }
    if changed {
        node.recompute_hash_and_size(hasher);
    }
    changed
}

pub(crate) fn find_leaf<'a>(node: &'a MerkleNode, name: &str) -> Option<&'a MerkleNode> {
    if node.is_leaf() {
        return (node.file_name.as_deref() == Some(name)).then_some(node);
    }
    find_leaf(node.left.as_deref()?, name).or_else(|| find_leaf(node.right.as_deref()?, name))
}

fn traverse_node(node: &MerkleNode, visit: &mut dyn FnMut(&MerkleNode) -> bool) -> bool {
    if !visit(node) {
        return false;
    }
    if let Some(left) = node.left.as_deref() {
        if !traverse_node(left, visit) {
            return false;
        }
    }
    if let Some(right) = node.right.as_deref() {
        if !traverse_node(right, visit) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use vault_basic_types::TreeId;
    use vault_utils::hash::hash_bytes;

    use super::*;

    pub(crate) fn file(name: &str) -> FileEntry {
        FileEntry {
            name: name.to_owned(),
            hash: hash_bytes(name.as_bytes()),
            length: name.len() as u64,
            last_modified: 1_700_000_000_000,
        }
    }

    pub(crate) fn tree_over(names: &[&str]) -> MerkleTree {
        let mut tree = MerkleTree::create(TreeId::generate());
        for name in names {
            tree.add_file(file(name)).unwrap();
        }
        tree
    }

    #[test]
    fn single_file_tree_has_leaf_root() {
        let tree = tree_over(&["A"]);
        let root = tree.root().unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.hash, hash_bytes(b"A"));
        assert_eq!(tree.metadata().total_files, 1);
        assert_eq!(tree.metadata().total_nodes, 1);
        assert_eq!(tree.metadata().total_size, 1);
        assert_eq!(tree.sorted_node_refs()[0].file_name, "A");
        assert_eq!(tree.sorted_node_refs()[0].file_index, 0);
    }

    #[test]
    fn two_files_pair_under_a_branch() {
        let tree = tree_over(&["A", "B"]);
        let root = tree.root().unwrap();
        assert!(!root.is_leaf());
        assert_eq!(root.node_count, 3);
        assert_eq!(root.leaf_count, 2);
        let expected = Sha256Hasher.hash_branch(&hash_bytes(b"A"), &hash_bytes(b"B"));
        assert_eq!(root.hash, expected);
    }

    #[test]
    fn insertion_keeps_leaf_counts_balanced() {
        for count in 1..=64_usize {
            let names: Vec<String> = (0..count).map(|i| format!("file{i:04}")).collect();
            let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let tree = tree_over(&name_refs);
            let root = tree.root().unwrap();
            assert_eq!(root.leaf_count as usize, count);
            assert_eq!(tree.metadata().total_nodes, root.node_count);

            let mut max_depth = 0_u32;
            let mut depth_of = vec![(root, 0_u32)];
            while let Some((node, depth)) = depth_of.pop() {
                max_depth = max_depth.max(depth);
                if let (Some(left), Some(right)) = (node.left.as_deref(), node.right.as_deref())
                {
                    depth_of.push((left, depth + 1));
                    depth_of.push((right, depth + 1));
                }
            }
            // The growth rule keeps the shape within a small factor of the
            // perfectly balanced depth.
            let balanced_depth = (count as f64).log2().ceil() as u32;
            assert!(
                max_depth <= balanced_depth + 2,
                "depth {max_depth} too large for {count} leaves"
            );
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut tree = tree_over(&["A"]);
        assert!(matches!(
            tree.add_file(file("A")),
            Err(TreeError::DuplicateFileName(name)) if name == "A"
        ));
    }

    #[test]
    fn update_propagates_to_root_and_leaves_siblings_alone() {
        let mut tree = tree_over(&["A", "B", "C"]);
        let old_root_hash = tree.root_hash().unwrap();
        let hash_a = tree.find_file_node("A").unwrap().hash;
        let hash_c = tree.find_file_node("C").unwrap().hash;

        let new_hash = hash_bytes(b"B-v2");
        let updated = tree
            .update_file(&FileEntry {
                name: "B".to_owned(),
                hash: new_hash,
                length: 1,
                last_modified: 1,
            })
            .unwrap();
        assert!(updated);

        assert_eq!(tree.find_file_node("B").unwrap().hash, new_hash);
        assert_ne!(tree.root_hash().unwrap(), old_root_hash);
        assert_eq!(tree.find_file_node("A").unwrap().hash, hash_a);
        assert_eq!(tree.find_file_node("C").unwrap().hash, hash_c);
    }

    #[test]
    fn update_on_empty_tree_is_fatal() {
        let mut tree = MerkleTree::create(TreeId::generate());
        assert!(matches!(
            tree.update_file(&file("A")),
            Err(TreeError::EmptyTree)
        ));
    }

    #[test]
    fn update_on_missing_name_reports_false() {
        let mut tree = tree_over(&["A"]);
        assert_eq!(tree.update_file(&file("B")).unwrap(), false);
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut tree = tree_over(&["A", "B"]);
        let entry = file("B");
        assert!(!tree.upsert_file(entry.clone()).unwrap());
        let after_first = tree.clone();
        assert!(!tree.upsert_file(entry).unwrap());
        assert_eq!(tree, after_first);

        assert!(tree.upsert_file(file("C")).unwrap());
        assert_eq!(tree.metadata().total_files, 3);
    }

    #[test]
    fn tombstone_updates_hash_size_and_index() {
        let mut tree = tree_over(&["A", "B", "C"]);
        let size_before = tree.metadata().total_size;
        assert!(tree.mark_file_as_deleted("B"));

        let leaf = tree.find_file_node_with_deletion_status("B", true).unwrap();
        assert!(leaf.is_deleted);
        assert_eq!(leaf.hash, Sha256Hasher.tombstone_hash("B"));
        assert_eq!(leaf.size, 0);
        assert_eq!(tree.metadata().total_size, size_before - 1);
        assert!(tree.find_node_ref("B").unwrap().is_deleted);
        // Active-only views skip the tombstone.
        assert!(tree.find_file_node("B").is_none());
        assert!(tree.get_file_info("B").is_none());
        assert_eq!(tree.get_active_files(), ["A", "C"]);
        // The leaf itself stays in the tree.
        assert_eq!(tree.metadata().total_files, 3);
    }

    #[test]
    fn tombstoning_twice_changes_nothing() {
        let mut tree = tree_over(&["A", "B"]);
        assert!(tree.mark_file_as_deleted("B"));
        let after_first = tree.clone();
        assert!(tree.mark_file_as_deleted("B"));
        assert_eq!(tree, after_first);
    }

    #[test]
    fn tombstone_on_missing_name_reports_false() {
        let mut tree = tree_over(&["A"]);
        assert!(!tree.mark_file_as_deleted("Z"));
        assert_eq!(tree.metadata().total_files, 1);
    }

    #[test]
    fn upsert_revives_a_tombstoned_leaf() {
        let mut tree = tree_over(&["A", "B"]);
        tree.mark_file_as_deleted("B");
        assert!(!tree.upsert_file(file("B")).unwrap());
        assert!(!tree.find_node_ref("B").unwrap().is_deleted);
        assert_eq!(tree.find_file_node("B").unwrap().hash, hash_bytes(b"B"));
    }

    #[test]
    fn hard_delete_rebuilds_and_preserves_identity() {
        let mut tree = tree_over(&["f1", "f2", "f3", "f4", "f5"]);
        let id = tree.metadata().id;
        let deleted = tree.delete_files(&["f1", "f3", "f5"]).unwrap();
        assert_eq!(deleted, 3);

        assert_eq!(tree.metadata().id, id);
        assert_eq!(tree.metadata().total_files, 2);
        assert_eq!(tree.get_active_files(), ["f2", "f4"]);
        assert_eq!(tree.metadata().total_nodes, tree.root().unwrap().node_count);
    }

    #[test]
    fn hard_delete_failure_modes() {
        let mut tree = tree_over(&["f1", "f2"]);
        let before = tree.clone();

        let empty: [&str; 0] = [];
        assert!(matches!(
            tree.delete_files(&empty),
            Err(TreeError::NoFilesSpecified)
        ));
        assert!(matches!(
            tree.delete_files(&["f1", "nope"]),
            Err(TreeError::UnknownFile(name)) if name == "nope"
        ));
        assert_eq!(tree, before);

        tree.delete_files(&["f1"]).unwrap();
        assert!(matches!(
            tree.delete_files(&["f1"]),
            Err(TreeError::UnknownFile(_))
        ));
    }

    #[test]
    fn deleting_every_file_empties_the_tree() {
        let mut tree = tree_over(&["a", "b"]);
        let id = tree.metadata().id;
        tree.delete_files(&["a", "b"]).unwrap();

        assert!(tree.is_empty());
        assert_eq!(tree.metadata().id, id);
        assert_eq!(tree.metadata().total_nodes, 0);
        assert_eq!(tree.metadata().total_files, 0);
        assert_eq!(tree.metadata().total_size, 0);
        assert!(tree.sorted_node_refs().is_empty());
    }

    #[test]
    fn hard_delete_drops_tombstones_it_names() {
        let mut tree = tree_over(&["a", "b", "c"]);
        tree.mark_file_as_deleted("b");
        tree.delete_files(&["b"]).unwrap();
        assert!(tree.find_node_ref("b").is_none());
        assert_eq!(tree.get_active_files(), ["a", "c"]);
    }

    #[test]
    fn sorted_index_is_order_independent() {
        let forward = tree_over(&["a", "b", "c", "d"]);
        let backward = tree_over(&["d", "c", "b", "a"]);
        let forward_names: Vec<_> = forward
            .sorted_node_refs()
            .iter()
            .map(|r| r.file_name.clone())
            .collect();
        let backward_names: Vec<_> = backward
            .sorted_node_refs()
            .iter()
            .map(|r| r.file_name.clone())
            .collect();
        assert_eq!(forward_names, backward_names);
        for name in ["a", "b", "c", "d"] {
            assert_eq!(
                forward.get_file_info(name).unwrap().hash,
                backward.get_file_info(name).unwrap().hash
            );
        }
    }

    #[test]
    fn traversal_is_preorder_and_stoppable() {
        let tree = tree_over(&["a", "b", "c"]);
        let mut visited = Vec::new();
        tree.traverse(&mut |node| {
            visited.push(node.node_count);
            true
        });
        // Root first, then the left subtree before the right one.
        assert_eq!(visited[0], tree.metadata().total_nodes);
        assert_eq!(visited.len() as u32, tree.metadata().total_nodes);

        let mut count = 0;
        tree.traverse(&mut |_| {
            count += 1;
            false
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn file_indices_record_insertion_order() {
        let mut tree = tree_over(&["m", "a", "z"]);
        assert_eq!(tree.find_node_ref("m").unwrap().file_index, 0);
        assert_eq!(tree.find_node_ref("a").unwrap().file_index, 1);
        assert_eq!(tree.find_node_ref("z").unwrap().file_index, 2);

        // Indices are never reused while the leaves stay indexed.
        tree.mark_file_as_deleted("z");
        tree.add_file(file("q")).unwrap();
        assert_eq!(tree.find_node_ref("q").unwrap().file_index, 3);
    }
}
