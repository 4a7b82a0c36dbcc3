// Linter settings.
#![warn(missing_debug_implementations, bare_trait_objects)]
#![warn(clippy::all)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

//! Incrementally maintained Merkle tree over a set of named files.
//!
//! The tree keeps a parallel index of leaf references sorted by a stable
//! collation of file names, so every name-keyed operation is independent of
//! the tree shape (which depends on insertion order). Trees persist through
//! the versioned binary codec in [`serialization`].

pub use crate::{
    compare::{compare_trees, TreeDiff},
    consistency::ConsistencyError,
    errors::{DeserializeError, DeserializeErrorKind, ErrorContext, TreeError},
    hasher::{HashTree, Sha256Hasher},
    serialization::{
        decode_tree, encode_tree, probe_version, version_from_prefix, BinaryReader, BinaryWriter,
    },
    types::{FileEntry, MerkleNode, MerkleNodeRef, MerkleTree, TreeMetadata, TreeVersion},
};

mod compare;
mod consistency;
mod errors;
mod hasher;
mod serialization;
mod tree;
mod types;

#[cfg(test)]
mod tests {
    use vault_basic_types::TreeId;
    use vault_utils::hash::hash_bytes;

    use super::*;

    #[test]
    fn empty_then_one_file() {
        let id: TreeId = "00000000-0000-0000-0000-000000000000".parse().unwrap();
        let mut tree = MerkleTree::create(id);
        assert!(tree.is_empty());

        tree.add_file(FileEntry {
            name: "A".to_owned(),
            hash: hash_bytes(b"A"),
            length: 1,
            last_modified: 42,
        })
        .unwrap();

        assert_eq!(tree.root_hash().unwrap(), hash_bytes(b"A"));
        assert_eq!(tree.metadata().total_files, 1);
        let refs = tree.sorted_node_refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].file_name, "A");
        assert_eq!(refs[0].file_index, 0);
        assert!(!refs[0].is_deleted);
    }

    #[test]
    fn save_load_round_trip_with_database_metadata() {
        let mut tree = MerkleTree::create(TreeId::generate());
        for name in ["one", "two", "three"] {
            tree.add_file(FileEntry {
                name: name.to_owned(),
                hash: hash_bytes(name.as_bytes()),
                length: name.len() as u64,
                last_modified: 7,
            })
            .unwrap();
        }
        tree.set_database_metadata(Some(bson::doc! { "filesImported": 7_i64 }));

        let loaded = decode_tree(&encode_tree(&tree)).unwrap();
        assert_eq!(loaded, tree);
        assert_eq!(
            loaded
                .database_metadata()
                .unwrap()
                .get_i64("filesImported")
                .unwrap(),
            7
        );
    }
}
