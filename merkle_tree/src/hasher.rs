//! Hashing operations on the Merkle tree.

use vault_basic_types::ContentHash;
use vault_utils::hash::hash_bytes;

/// Prefix mixed into tombstone hashes so a deleted leaf can never collide
/// with live file content.
const TOMBSTONE_PREFIX: &[u8] = b"DELETED:";

/// Hashing scheme of the tree. The single production implementation is
/// [`Sha256Hasher`]; the trait exists so tests can observe hash inputs.
pub trait HashTree: Send + Sync {
    /// Unique name of the hasher, for diagnostics.
    fn name(&self) -> &'static str;

    /// Compresses the hashes of 2 children in a branch node.
    fn hash_branch(&self, lhs: &ContentHash, rhs: &ContentHash) -> ContentHash;

    /// Hash of a tombstoned leaf; a function of the file name only.
    fn tombstone_hash(&self, file_name: &str) -> ContentHash;
}

impl<H: HashTree + ?Sized> HashTree for &H {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn hash_branch(&self, lhs: &ContentHash, rhs: &ContentHash) -> ContentHash {
        (**self).hash_branch(lhs, rhs)
    }

    fn tombstone_hash(&self, file_name: &str) -> ContentHash {
        (**self).tombstone_hash(file_name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl HashTree for Sha256Hasher {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn hash_branch(&self, lhs: &ContentHash, rhs: &ContentHash) -> ContentHash {
        let mut bytes = [0_u8; 64];
        bytes[..32].copy_from_slice(lhs.as_bytes());
        bytes[32..].copy_from_slice(rhs.as_bytes());
        hash_bytes(&bytes)
    }

    fn tombstone_hash(&self, file_name: &str) -> ContentHash {
        let mut bytes = Vec::with_capacity(TOMBSTONE_PREFIX.len() + file_name.len());
        bytes.extend_from_slice(TOMBSTONE_PREFIX);
        bytes.extend_from_slice(file_name.as_bytes());
        hash_bytes(&bytes)
    }
}
