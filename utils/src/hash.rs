//! SHA-256 helpers shared by file hashing, tree-node composition and the
//! hash-cache checksum trailer.

use std::{
    io::{self, Read},
    path::Path,
};

use sha2::{Digest, Sha256};
use vault_basic_types::ContentHash;

/// Chunk size for streaming digests. Large enough to amortize syscalls, small
/// enough to keep worker memory flat.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

pub fn hash_bytes(inputs: &[u8]) -> ContentHash {
    let digest = Sha256::digest(inputs);
    ContentHash::from_bytes(digest.into())
}

/// Streams `reader` through SHA-256 without buffering the whole content.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<ContentHash> {
    let mut hasher = Sha256::new();
    let mut chunk = vec![0_u8; STREAM_CHUNK_SIZE];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(ContentHash::from_bytes(hasher.finalize().into()))
}

/// Streams an async source through SHA-256; used to verify uploads by
/// re-reading them from storage.
pub async fn hash_async_reader<R>(mut reader: R) -> io::Result<ContentHash>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt as _;

    let mut hasher = Sha256::new();
    let mut chunk = vec![0_u8; STREAM_CHUNK_SIZE];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(ContentHash::from_bytes(hasher.finalize().into()))
}

/// Hashes a file's content off the async runtime's worker threads.
pub async fn hash_file(path: impl AsRef<Path>) -> io::Result<ContentHash> {
    let path = path.as_ref().to_owned();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(path)?;
        hash_reader(io::BufReader::new(file))
    })
    .await
    .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
}
