//! On-disk cache of file hashes for fast re-scans.
//!
//! The cache is one binary file: a header (`version`, `entry count`), the
//! entries sorted by path, and a SHA-256 checksum trailer over everything
//! before it. Each entry is a length-prefixed UTF-8 path followed by the
//! 32-byte content hash, the file length and the last-modified timestamp
//! (both unsigned 48-bit little-endian).
//!
//! In memory the entries live contiguously in one growable buffer; a parallel
//! offset table supports binary search by path without deserializing
//! entries. Saves are atomic (temp file + rename). Worker processes open the
//! cache read-only, which turns `save` into a no-op.

mod cache;

pub use cache::{HashCache, HashCacheEntry, HashCacheError, CACHE_VERSION};
