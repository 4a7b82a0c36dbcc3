//! Versioned binary codec for the Merkle tree.
//!
//! All multi-byte integers are little-endian; 64-bit values are written as
//! two 32-bit halves, low half first. The current layout (V4) is:
//!
//! 1. format version (`u32`);
//! 2. database metadata: `u32` byte length + BSON document (0 = absent);
//! 3. tree metadata: 16 raw UUID bytes, total nodes (`u32`), total files
//!    (`u32`), total size (`u64`);
//! 4. nodes flattened in pre-order, each as hash (32 bytes), node count
//!    (`u32`), leaf count (`u32`), size (`u64`), file name length (`u32`,
//!    0 for interior nodes) + file name bytes + last-modified (`u64`, leaves
//!    only), deletion flag (`u8`);
//! 5. sorted index: entry count (`u32`), then file name length + bytes,
//!    file index (`u32`), deletion flag (`u8`) per entry.
//!
//! V3 is structurally identical to V4. V2 lacks the database metadata block,
//! omits per-leaf timestamps and carries a created-at/modified-at pair after
//! the tree totals, which the reader consumes and discards.

use std::io::Read;
use std::str;

use byteorder::{LittleEndian, WriteBytesExt};
use vault_basic_types::{ContentHash, TreeId, HASH_SIZE};

use crate::{
    errors::{DeserializeError, DeserializeErrorKind, ErrorContext},
    types::{MerkleNode, MerkleNodeRef, MerkleTree, TreeMetadata, TreeVersion},
};

/// Sink for the binary layout. Writing cannot fail: the buffer grows as
/// needed.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buffer: Vec<u8>,
}

impl BinaryWriter {
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.write_u32::<LittleEndian>(value).unwrap();
        // ^ `unwrap()` is safe; writing to a `Vec<u8>` always succeeds
    }

    /// Two LE 32-bit halves, low then high.
    pub fn write_u64(&mut self, value: u64) {
        self.write_u32(value as u32);
        self.write_u32((value >> 32) as u32);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Length-prefixed UTF-8.
    pub fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.write_bytes(s.as_bytes());
    }

    /// Length-prefixed BSON document; `None` writes a zero length.
    pub fn write_bson(&mut self, document: Option<&bson::Document>) {
        let Some(document) = document else {
            self.write_u32(0);
            return;
        };
        let mut bytes = Vec::new();
        document
            .to_writer(&mut bytes)
            .expect("serializing a BSON document to a buffer cannot fail");
        self.write_u32(bytes.len() as u32);
        self.write_bytes(&bytes);
    }
}

/// Cursor over the binary layout; every read checks the remaining length and
/// reports the field it was decoding on failure.
#[derive(Debug)]
pub struct BinaryReader<'a> {
    bytes: &'a [u8],
}

impl<'a> BinaryReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn is_at_end(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn read_bytes(
        &mut self,
        len: usize,
        context: ErrorContext,
    ) -> Result<&'a [u8], DeserializeError> {
        if self.bytes.len() < len {
            return Err(DeserializeErrorKind::UnexpectedEof.with_context(context));
        }
        let (bytes, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(bytes)
    }

    pub fn read_u8(&mut self, context: ErrorContext) -> Result<u8, DeserializeError> {
        Ok(self.read_bytes(1, context)?[0])
    }

    pub fn read_u32(&mut self, context: ErrorContext) -> Result<u32, DeserializeError> {
        let bytes = self.read_bytes(4, context)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u64(&mut self, context: ErrorContext) -> Result<u64, DeserializeError> {
        let low = self.read_u32(context)?;
        let high = self.read_u32(context)?;
        Ok(u64::from(low) | (u64::from(high) << 32))
    }

    pub fn read_string(&mut self, context: ErrorContext) -> Result<String, DeserializeError> {
        let len = self.read_u32(context)? as usize;
        let bytes = self.read_bytes(len, context)?;
        let s = str::from_utf8(bytes)
            .map_err(|err| DeserializeErrorKind::Utf8(err).with_context(context))?;
        Ok(s.to_owned())
    }

    pub fn read_flag(&mut self, context: ErrorContext) -> Result<bool, DeserializeError> {
        match self.read_u8(context)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DeserializeErrorKind::InvalidFlag(other).with_context(context)),
        }
    }

    pub fn read_bson(
        &mut self,
        context: ErrorContext,
    ) -> Result<Option<bson::Document>, DeserializeError> {
        let len = self.read_u32(context)? as usize;
        if len == 0 {
            return Ok(None);
        }
        let mut bytes = self.read_bytes(len, context)?;
        let document = bson::Document::from_reader(&mut bytes)
            .map_err(|err| DeserializeErrorKind::Bson(err).with_context(context))?;
        Ok(Some(document))
    }
}

/// Serializes the tree at the current format version.
pub fn encode_tree(tree: &MerkleTree) -> Vec<u8> {
    let mut writer = BinaryWriter::default();
    writer.write_u32(TreeVersion::CURRENT.as_raw());
    writer.write_bson(tree.database_metadata());
    writer.write_bytes(&tree.metadata().id.to_fixed_bytes());
    writer.write_u32(tree.metadata().total_nodes);
    writer.write_u32(tree.metadata().total_files);
    writer.write_u64(tree.metadata().total_size);
    if let Some(root) = tree.root() {
        write_node(&mut writer, root);
    }
    let refs = tree.sorted_node_refs();
    writer.write_u32(refs.len() as u32);
    for node_ref in refs {
        writer.write_string(&node_ref.file_name);
        writer.write_u32(node_ref.file_index);
        writer.write_u8(node_ref.is_deleted as u8);
    }
    writer.into_bytes()
}

fn write_node(writer: &mut BinaryWriter, node: &MerkleNode) {
    writer.write_bytes(node.hash.as_bytes());
    writer.write_u32(node.node_count);
    writer.write_u32(node.leaf_count);
    writer.write_u64(node.size);
    match &node.file_name {
        Some(file_name) => {
            writer.write_string(file_name);
            writer.write_u64(node.last_modified);
        }
        None => writer.write_u32(0),
    }
    writer.write_u8(node.is_deleted as u8);
    if let Some(left) = node.left.as_deref() {
        write_node(writer, left);
    }
    if let Some(right) = node.right.as_deref() {
        write_node(writer, right);
    }
}

/// Deserializes a tree from any supported format version.
pub fn decode_tree(bytes: &[u8]) -> Result<MerkleTree, DeserializeError> {
    let mut reader = BinaryReader::new(bytes);
    let raw_version = reader.read_u32(ErrorContext::Version)?;
    let version = TreeVersion::from_raw(raw_version)
        .ok_or_else(|| {
            DeserializeErrorKind::UnsupportedVersion(raw_version)
                .with_context(ErrorContext::Version)
        })?;

    let database_metadata = if version >= TreeVersion::V3 {
        reader.read_bson(ErrorContext::DatabaseMetadata)?
    } else {
        None
    };

    let id_bytes: [u8; 16] = reader
        .read_bytes(16, ErrorContext::TreeId)?
        .try_into()
        .unwrap();
    let metadata = TreeMetadata {
        id: TreeId::from_fixed_bytes(id_bytes),
        total_nodes: reader.read_u32(ErrorContext::TreeTotals)?,
        total_files: reader.read_u32(ErrorContext::TreeTotals)?,
        total_size: reader.read_u64(ErrorContext::TreeTotals)?,
    };
    if version == TreeVersion::V2 {
        // Created-at and modified-at, dropped in V3+.
        reader.read_u64(ErrorContext::Timestamps)?;
        reader.read_u64(ErrorContext::Timestamps)?;
    }

    let root = if metadata.total_nodes == 0 {
        None
    } else {
        Some(read_node(&mut reader, version)?)
    };

    let ref_count = reader.read_u32(ErrorContext::NodeRef)?;
    let mut sorted_node_refs = Vec::with_capacity(ref_count.min(u16::MAX as u32) as usize);
    for _ in 0..ref_count {
        sorted_node_refs.push(MerkleNodeRef {
            file_name: reader.read_string(ErrorContext::NodeRef)?,
            file_index: reader.read_u32(ErrorContext::NodeRef)?,
            is_deleted: reader.read_flag(ErrorContext::NodeRef)?,
        });
    }

    Ok(MerkleTree::from_parts(
        root,
        sorted_node_refs,
        metadata,
        database_metadata,
        version,
    ))
}

fn read_node(
    reader: &mut BinaryReader<'_>,
    version: TreeVersion,
) -> Result<Box<MerkleNode>, DeserializeError> {
    let hash_bytes = reader.read_bytes(HASH_SIZE, ErrorContext::NodeHash)?;
    let hash = ContentHash::from_slice(hash_bytes).unwrap();
    let node_count = reader.read_u32(ErrorContext::NodeCounts)?;
    let leaf_count = reader.read_u32(ErrorContext::NodeCounts)?;
    let size = reader.read_u64(ErrorContext::NodeCounts)?;

    let file_name_len = reader.read_u32(ErrorContext::FileName)? as usize;
    let (file_name, last_modified) = if file_name_len > 0 {
        let name_bytes = reader.read_bytes(file_name_len, ErrorContext::FileName)?;
        let file_name = str::from_utf8(name_bytes)
            .map_err(|err| DeserializeErrorKind::Utf8(err).with_context(ErrorContext::FileName))?
            .to_owned();
        let last_modified = if version >= TreeVersion::V3 {
            reader.read_u64(ErrorContext::LastModified)?
        } else {
            0
        };
        (Some(file_name), last_modified)
    } else {
        (None, 0)
    };
    let is_deleted = reader.read_flag(ErrorContext::DeletedFlag)?;

    let mut node = Box::new(MerkleNode {
        hash,
        file_name,
        node_count,
        leaf_count,
        size,
        last_modified,
        is_deleted,
        left: None,
        right: None,
    });
    if node_count > 1 {
        let left = read_node(reader, version)?;
        let right = read_node(reader, version)?;
        if node.node_count != 1 + left.node_count + right.node_count {
            return Err(DeserializeErrorKind::MalformedNodeArray
                .with_context(ErrorContext::NodeCounts));
        }
        node.left = Some(left);
        node.right = Some(right);
    }
    Ok(node)
}

/// Reads the format version from the first 4 bytes of a streaming source
/// without loading the rest of the file.
pub fn probe_version(reader: &mut dyn Read) -> Result<u32, DeserializeError> {
    let mut buffer = [0_u8; 4];
    reader
        .read_exact(&mut buffer)
        .map_err(|_| DeserializeErrorKind::UnexpectedEof.with_context(ErrorContext::Version))?;
    Ok(u32::from_le_bytes(buffer))
}

/// Same probe over an in-memory prefix, for callers that already hold the
/// first bytes of the file.
pub fn version_from_prefix(prefix: &[u8]) -> Result<u32, DeserializeError> {
    probe_version(&mut &prefix[..])
}

#[cfg(test)]
mod tests {
    use vault_utils::hash::hash_bytes;

    use super::*;
    use crate::types::FileEntry;

    fn sample_tree() -> MerkleTree {
        let mut tree = MerkleTree::create(TreeId::generate());
        for name in ["photos/a.jpg", "photos/b.jpg", "videos/c.mp4"] {
            tree.add_file(FileEntry {
                name: name.to_owned(),
                hash: hash_bytes(name.as_bytes()),
                length: name.len() as u64,
                last_modified: 1_699_999_999_999,
            })
            .unwrap();
        }
        tree.mark_file_as_deleted("photos/b.jpg");
        tree
    }

    #[test]
    fn round_trip_preserves_everything() {
        let mut tree = sample_tree();
        tree.set_database_metadata(Some(bson::doc! { "filesImported": 7_i64 }));

        let bytes = encode_tree(&tree);
        let decoded = decode_tree(&bytes).unwrap();
        assert_eq!(decoded, tree);
    }

    #[test]
    fn save_then_load_then_save_is_a_fixed_point() {
        let tree = sample_tree();
        let bytes = encode_tree(&tree);
        let reencoded = encode_tree(&decode_tree(&bytes).unwrap());
        assert_eq!(bytes, reencoded);
    }

    #[test]
    fn empty_tree_round_trips() {
        let tree = MerkleTree::create(TreeId::generate());
        let decoded = decode_tree(&encode_tree(&tree)).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded, tree);
    }

    #[test]
    fn version_header_is_probed_from_first_four_bytes() {
        let bytes = encode_tree(&sample_tree());
        assert_eq!(version_from_prefix(&bytes).unwrap(), 4);

        let mut reader = &bytes[..];
        assert_eq!(probe_version(&mut reader).unwrap(), 4);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut tree_bytes = encode_tree(&sample_tree());
        tree_bytes[..4].copy_from_slice(&99_u32.to_le_bytes());
        let err = decode_tree(&tree_bytes).unwrap_err();
        assert!(matches!(
            err.kind(),
            DeserializeErrorKind::UnsupportedVersion(99)
        ));
    }

    #[test]
    fn truncated_input_reports_eof_with_context() {
        let bytes = encode_tree(&sample_tree());
        let err = decode_tree(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err.kind(), DeserializeErrorKind::UnexpectedEof));
        assert!(err.context().is_some());
    }

    #[test]
    fn v3_layout_decodes_like_v4() {
        let tree = sample_tree();
        let mut bytes = encode_tree(&tree);
        bytes[..4].copy_from_slice(&3_u32.to_le_bytes());

        let decoded = decode_tree(&bytes).unwrap();
        assert_eq!(decoded.version(), TreeVersion::V3);
        assert_eq!(decoded.root_hash(), tree.root_hash());
        assert_eq!(decoded.sorted_node_refs(), tree.sorted_node_refs());
    }

    #[test]
    fn v2_layout_drops_metadata_and_timestamps() {
        // Hand-assemble a single-leaf V2 file.
        let leaf_hash = hash_bytes(b"legacy content");
        let id = TreeId::generate();
        let mut writer = BinaryWriter::default();
        writer.write_u32(2); // version
        writer.write_bytes(&id.to_fixed_bytes());
        writer.write_u32(1); // total nodes
        writer.write_u32(1); // total files
        writer.write_u64(14); // total size
        writer.write_u64(1_600_000_000_000); // created at, discarded
        writer.write_u64(1_600_000_000_001); // modified at, discarded
        writer.write_bytes(leaf_hash.as_bytes());
        writer.write_u32(1); // node count
        writer.write_u32(1); // leaf count
        writer.write_u64(14); // size
        writer.write_string("legacy.bin");
        // No per-leaf timestamp in V2.
        writer.write_u8(0); // not deleted
        writer.write_u32(1); // ref count
        writer.write_string("legacy.bin");
        writer.write_u32(0); // file index
        writer.write_u8(0);

        let decoded = decode_tree(&writer.into_bytes()).unwrap();
        assert_eq!(decoded.version(), TreeVersion::V2);
        assert_eq!(decoded.metadata().id, id);
        assert!(decoded.database_metadata().is_none());
        let leaf = decoded.find_file_node("legacy.bin").unwrap();
        assert_eq!(leaf.hash, leaf_hash);
        assert_eq!(leaf.last_modified, 0);

        // Migration happens on save: the re-encoded file is V4.
        let migrated = encode_tree(&decoded);
        assert_eq!(version_from_prefix(&migrated).unwrap(), 4);
        let reloaded = decode_tree(&migrated).unwrap();
        assert_eq!(reloaded.version(), TreeVersion::V4);
        assert_eq!(reloaded.root_hash(), decoded.root_hash());
    }

    #[test]
    fn corrupted_flag_byte_is_a_corruption_error() {
        let tree = sample_tree();
        let mut bytes = encode_tree(&tree);
        let last = bytes.len() - 1;
        bytes[last] = 7; // the final ref's deletion flag
        let err = decode_tree(&bytes).unwrap_err();
        assert!(matches!(err.kind(), DeserializeErrorKind::InvalidFlag(7)));
    }

    #[test]
    fn writer_encodes_u64_as_two_le_halves() {
        let mut writer = BinaryWriter::default();
        writer.write_u64(0x0102_0304_0506_0708);
        assert_eq!(
            writer.into_bytes(),
            [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }
}
