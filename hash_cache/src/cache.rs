use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use byteorder::{ByteOrder, LittleEndian};
use vault_basic_types::{ContentHash, EpochMillis, HASH_SIZE};
use vault_utils::{
    collate::{collate_paths, normalize_path},
    hash::hash_bytes,
};

/// Current cache format version.
pub const CACHE_VERSION: u32 = 1;

/// `version` + `entry count`.
const HEADER_SIZE: usize = 8;
const CHECKSUM_SIZE: usize = HASH_SIZE;
/// The smallest well-formed file: a header and a checksum, no entries.
const MIN_FILE_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;
const U48_SIZE: usize = 6;
const U48_MAX: u64 = (1 << 48) - 1;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HashCacheError {
    #[error("hash cache file is corrupted: {0}")]
    Corrupted(&'static str),
    #[error("hash cache version {found} is newer than the supported {CACHE_VERSION}")]
    VersionTooNew { found: u32 },
    #[error("I/O error accessing the hash cache: {0}")]
    Io(#[from] std::io::Error),
}

/// Cached knowledge about one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCacheEntry {
    pub hash: ContentHash,
    pub length: u64,
    pub last_modified: EpochMillis,
}

/// Path-keyed cache of `(hash, length, last modified)` triples, persisted as
/// a single checksummed file.
#[derive(Debug)]
pub struct HashCache {
    file_path: PathBuf,
    /// Entries, contiguous and sorted by path.
    buffer: Vec<u8>,
    /// Byte offset of the i-th entry within `buffer`.
    offset_lookup: Vec<usize>,
    is_dirty: bool,
    read_only: bool,
}

impl HashCache {
    /// Loads the cache from disk.
    ///
    /// An absent file yields an empty cache. A file with an older format
    /// version is discarded and the cache starts empty. A truncated file, a
    /// checksum mismatch or a version newer than [`CACHE_VERSION`] are fatal.
    pub fn load(file_path: impl Into<PathBuf>, read_only: bool) -> Result<Self, HashCacheError> {
        let file_path = file_path.into();
        let bytes = match fs::read(&file_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(Self::empty(file_path, read_only));
            }
            Err(err) => return Err(err.into()),
        };

        if bytes.len() < MIN_FILE_SIZE {
            return Err(HashCacheError::Corrupted("file shorter than the header"));
        }
        let (payload, trailer) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
        if hash_bytes(payload).as_bytes() != trailer {
            return Err(HashCacheError::Corrupted("checksum mismatch"));
        }

        let version = LittleEndian::read_u32(&payload[..4]);
        if version > CACHE_VERSION {
            return Err(HashCacheError::VersionTooNew { found: version });
        }
        if version < CACHE_VERSION {
            // Older formats are not worth migrating: the cache is rebuilt
            // from file content on the next scan anyway.
            vault_logs::info!(
                "discarding hash cache {:?} with outdated version {version}",
                file_path
            );
            if !read_only {
                fs::remove_file(&file_path)?;
            }
            return Ok(Self::empty(file_path, read_only));
        }

        let entry_count = LittleEndian::read_u32(&payload[4..8]) as usize;
        let buffer = payload[HEADER_SIZE..].to_vec();
        let mut offset_lookup = Vec::with_capacity(entry_count);
        let mut offset = 0_usize;
        for _ in 0..entry_count {
            offset_lookup.push(offset);
            let path_len = buffer
                .get(offset..offset + 4)
                .map(LittleEndian::read_u32)
                .ok_or(HashCacheError::Corrupted("entry overruns the buffer"))?
                as usize;
            let entry_size = Self::entry_size(path_len);
            if offset + entry_size > buffer.len() {
                return Err(HashCacheError::Corrupted("entry overruns the buffer"));
            }
            std::str::from_utf8(&buffer[offset + 4..offset + 4 + path_len])
                .map_err(|_| HashCacheError::Corrupted("entry path is not UTF-8"))?;
            offset += entry_size;
        }
        if offset != buffer.len() {
            return Err(HashCacheError::Corrupted("trailing bytes after entries"));
        }

        Ok(Self {
            file_path,
            buffer,
            offset_lookup,
            is_dirty: false,
            read_only,
        })
    }

    fn empty(file_path: PathBuf, read_only: bool) -> Self {
        Self {
            file_path,
            buffer: Vec::new(),
            offset_lookup: Vec::new(),
            is_dirty: false,
            read_only,
        }
    }

    pub fn len(&self) -> usize {
        self.offset_lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offset_lookup.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Looks the path up; O(log n) probes of the offset table.
    pub fn get_hash(&self, path: &str) -> Option<HashCacheEntry> {
        let path = normalize_path(path);
        let index = self.find(&path).ok()?;
        Some(self.entry_at(self.offset_lookup[index]))
    }

    /// Inserts or overwrites the entry for `path`, keeping the buffer sorted.
    pub fn add_hash(&mut self, path: &str, entry: HashCacheEntry) {
        let path = normalize_path(path);
        match self.find(&path) {
            Ok(index) => {
                // Same path, fixed-size payload: overwrite in place.
                let offset = self.offset_lookup[index];
                let path_len = self.path_len_at(offset);
                Self::write_payload(
                    &mut self.buffer[offset + 4 + path_len..offset + Self::entry_size(path_len)],
                    &entry,
                );
            }
            Err(index) => {
                let offset = self
                    .offset_lookup
                    .get(index)
                    .copied()
                    .unwrap_or(self.buffer.len());
                let entry_size = Self::entry_size(path.len());
                let mut bytes = Vec::with_capacity(entry_size);
                bytes.extend_from_slice(&(path.len() as u32).to_le_bytes());
                bytes.extend_from_slice(path.as_bytes());
                let payload_start = bytes.len();
                bytes.resize(entry_size, 0);
                Self::write_payload(&mut bytes[payload_start..], &entry);

                self.buffer.splice(offset..offset, bytes);
                self.offset_lookup.insert(index, offset);
                for later_offset in &mut self.offset_lookup[index + 1..] {
                    *later_offset += entry_size;
                }
            }
        }
        self.is_dirty = true;
    }

    /// Removes the entry; returns `false` if the path was not cached.
    pub fn remove_hash(&mut self, path: &str) -> bool {
        let path = normalize_path(path);
        let Ok(index) = self.find(&path) else {
            return false;
        };
        let offset = self.offset_lookup[index];
        let entry_size = Self::entry_size(self.path_len_at(offset));
        self.buffer.drain(offset..offset + entry_size);
        self.offset_lookup.remove(index);
        for later_offset in &mut self.offset_lookup[index..] {
            *later_offset -= entry_size;
        }
        self.is_dirty = true;
        true
    }

    /// Persists the cache atomically. A clean or read-only cache saves
    /// nothing.
    pub fn save(&mut self) -> Result<(), HashCacheError> {
        if !self.is_dirty || self.read_only {
            return Ok(());
        }

        let mut bytes =
            Vec::with_capacity(HEADER_SIZE + self.buffer.len() + CHECKSUM_SIZE);
        bytes.extend_from_slice(&CACHE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.offset_lookup.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.buffer);
        let checksum = hash_bytes(&bytes);
        bytes.extend_from_slice(checksum.as_bytes());

        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = {
            let mut os_path = self.file_path.clone().into_os_string();
            os_path.push(".tmp");
            PathBuf::from(os_path)
        };
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &self.file_path)?;
        self.is_dirty = false;
        Ok(())
    }

    /// All cached paths, in collation order. Test and diagnostics helper.
    pub fn paths(&self) -> Vec<String> {
        self.offset_lookup
            .iter()
            .map(|&offset| self.path_at(offset).to_owned())
            .collect()
    }

    const fn entry_size(path_len: usize) -> usize {
        4 + path_len + HASH_SIZE + U48_SIZE + U48_SIZE
    }

    fn find(&self, path: &str) -> Result<usize, usize> {
        self.offset_lookup
            .binary_search_by(|&offset| collate_paths(self.path_at(offset), path))
    }

    fn path_len_at(&self, offset: usize) -> usize {
        LittleEndian::read_u32(&self.buffer[offset..offset + 4]) as usize
    }

    fn path_at(&self, offset: usize) -> &str {
        let path_len = self.path_len_at(offset);
        std::str::from_utf8(&self.buffer[offset + 4..offset + 4 + path_len])
            .expect("cache paths are validated on load and on insert")
    }

    fn entry_at(&self, offset: usize) -> HashCacheEntry {
        let payload_start = offset + 4 + self.path_len_at(offset);
        let bytes = &self.buffer[payload_start..payload_start + HASH_SIZE + 2 * U48_SIZE];
        HashCacheEntry {
            hash: ContentHash::from_slice(&bytes[..HASH_SIZE]).unwrap(),
            length: LittleEndian::read_u48(&bytes[HASH_SIZE..HASH_SIZE + U48_SIZE]),
            last_modified: LittleEndian::read_u48(&bytes[HASH_SIZE + U48_SIZE..]),
        }
    }

    fn write_payload(bytes: &mut [u8], entry: &HashCacheEntry) {
        bytes[..HASH_SIZE].copy_from_slice(entry.hash.as_bytes());
        LittleEndian::write_u48(
            &mut bytes[HASH_SIZE..HASH_SIZE + U48_SIZE],
            entry.length.min(U48_MAX),
        );
        LittleEndian::write_u48(
            &mut bytes[HASH_SIZE + U48_SIZE..],
            entry.last_modified.min(U48_MAX),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seed: u8) -> HashCacheEntry {
        HashCacheEntry {
            hash: ContentHash::from_bytes([seed; HASH_SIZE]),
            length: u64::from(seed) * 1_000,
            last_modified: 1_700_000_000_000 + u64::from(seed),
        }
    }

    fn cache_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("hash-cache-x.dat")
    }

    #[test]
    fn thousand_entries_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HashCache::load(cache_path(&dir), false).unwrap();
        for i in 0..1_000_u32 {
            cache.add_hash(&format!("file{i:04}"), entry((i % 251) as u8));
        }
        cache.save().unwrap();
        assert!(!cache.is_dirty());

        let reloaded = HashCache::load(cache_path(&dir), false).unwrap();
        assert_eq!(reloaded.len(), 1_000);
        for i in 0..1_000_u32 {
            assert_eq!(
                reloaded.get_hash(&format!("file{i:04}")),
                Some(entry((i % 251) as u8)),
                "entry {i} mismatch"
            );
        }
    }

    #[test]
    fn absent_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::load(cache_path(&dir), false).unwrap();
        assert!(cache.is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn corruption_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);
        let mut cache = HashCache::load(&path, false).unwrap();
        cache.add_hash("a", entry(1));
        cache.save().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            HashCache::load(&path, false),
            Err(HashCacheError::Corrupted("checksum mismatch"))
        ));

        fs::write(&path, [0_u8; 10]).unwrap();
        assert!(matches!(
            HashCache::load(&path, false),
            Err(HashCacheError::Corrupted(_))
        ));
    }

    #[test]
    fn newer_version_is_fatal_older_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);

        let mut forged = Vec::new();
        forged.extend_from_slice(&(CACHE_VERSION + 1).to_le_bytes());
        forged.extend_from_slice(&0_u32.to_le_bytes());
        let checksum = hash_bytes(&forged);
        forged.extend_from_slice(checksum.as_bytes());
        fs::write(&path, &forged).unwrap();
        assert!(matches!(
            HashCache::load(&path, false),
            Err(HashCacheError::VersionTooNew { .. })
        ));

        let mut forged = Vec::new();
        forged.extend_from_slice(&0_u32.to_le_bytes());
        forged.extend_from_slice(&0_u32.to_le_bytes());
        let checksum = hash_bytes(&forged);
        forged.extend_from_slice(checksum.as_bytes());
        fs::write(&path, &forged).unwrap();
        let cache = HashCache::load(&path, false).unwrap();
        assert!(cache.is_empty());
        // The outdated file is gone.
        assert!(!path.exists());
    }

    #[test]
    fn entries_stay_sorted_and_searchable() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HashCache::load(cache_path(&dir), false).unwrap();
        for name in ["zeta", "Alpha", "midway", "alpha2", "Beta"] {
            cache.add_hash(name, entry(9));
        }
        let paths = cache.paths();
        let mut sorted = paths.clone();
        sorted.sort_by(|a, b| collate_paths(a, b));
        assert_eq!(paths, sorted);
        for name in ["zeta", "Alpha", "midway", "alpha2", "Beta"] {
            assert!(cache.get_hash(name).is_some());
        }
        assert!(cache.get_hash("missing").is_none());
    }

    #[test]
    fn paths_are_normalized_on_every_surface() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HashCache::load(cache_path(&dir), false).unwrap();
        cache.add_hash("\\photos\\2024\\img.jpg", entry(3));

        assert_eq!(cache.paths(), ["photos/2024/img.jpg"]);
        assert_eq!(cache.get_hash("/photos/2024/img.jpg"), Some(entry(3)));
        assert!(cache.remove_hash("photos\\2024\\img.jpg"));
        assert!(cache.is_empty());
    }

    #[test]
    fn overwrite_in_place_keeps_single_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HashCache::load(cache_path(&dir), false).unwrap();
        cache.add_hash("a", entry(1));
        cache.add_hash("b", entry(2));
        cache.add_hash("a", entry(7));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_hash("a"), Some(entry(7)));
        assert_eq!(cache.get_hash("b"), Some(entry(2)));
    }

    #[test]
    fn remove_shifts_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HashCache::load(cache_path(&dir), false).unwrap();
        cache.add_hash("a", entry(1));
        cache.add_hash("b", entry(2));
        cache.add_hash("c", entry(3));

        assert!(cache.remove_hash("b"));
        assert!(!cache.remove_hash("b"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_hash("a"), Some(entry(1)));
        assert_eq!(cache.get_hash("c"), Some(entry(3)));
        assert!(cache.get_hash("b").is_none());
    }

    #[test]
    fn read_only_mode_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);
        let mut writer = HashCache::load(&path, false).unwrap();
        writer.add_hash("a", entry(1));
        writer.save().unwrap();

        let mut reader = HashCache::load(&path, true).unwrap();
        assert!(reader.is_read_only());
        assert_eq!(reader.get_hash("a"), Some(entry(1)));
        reader.add_hash("b", entry(2));
        reader.save().unwrap();

        // The save was a silent no-op: a fresh load sees only `a`.
        let fresh = HashCache::load(&path, false).unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn save_is_a_no_op_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);
        let mut cache = HashCache::load(&path, false).unwrap();
        cache.save().unwrap();
        // Nothing was dirty, so nothing was written.
        assert!(!path.exists());
    }

    #[test]
    fn lengths_clamp_to_48_bits() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HashCache::load(cache_path(&dir), false).unwrap();
        cache.add_hash(
            "big",
            HashCacheEntry {
                hash: ContentHash::zero(),
                length: u64::MAX,
                last_modified: u64::MAX,
            },
        );
        let cached = cache.get_hash("big").unwrap();
        assert_eq!(cached.length, U48_MAX);
        assert_eq!(cached.last_modified, U48_MAX);
    }
}
