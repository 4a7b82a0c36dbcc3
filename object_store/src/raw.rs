use std::{error, fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use vault_basic_types::EpochMillis;
use vault_config::{ObjectStoreConfig, ObjectStoreMode};

use crate::{file::FileBackedObjectStore, mock::MockStore};

/// Thread-safe boxed error.
pub type BoxedError = Box<dyn error::Error + Send + Sync>;

/// Byte stream handed out by [`ObjectStore::read_stream`] and accepted by
/// [`ObjectStore::write_stream`].
pub type ObjectStream = Box<dyn AsyncRead + Send + Unpin>;

/// Errors during [`ObjectStore`] operations.
#[derive(Debug)]
pub enum ObjectStoreError {
    /// An object with the specified path is not found.
    NotFound(BoxedError),
    /// The store is read-only and a write was attempted.
    ReadOnly,
    /// Other error has occurred when accessing the store (e.g., an I/O error).
    Other(BoxedError),
}

impl ObjectStoreError {
    pub(crate) fn not_found(path: &str) -> Self {
        Self::NotFound(format!("object `{path}` does not exist").into())
    }
}

impl fmt::Display for ObjectStoreError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(err) => write!(formatter, "object not found: {err}"),
            Self::ReadOnly => formatter.write_str("store is read-only"),
            Self::Other(err) => write!(formatter, "other error: {err}"),
        }
    }
}

impl error::Error for ObjectStoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::NotFound(err) | Self::Other(err) => Some(err.as_ref()),
            Self::ReadOnly => None,
        }
    }
}

impl From<std::io::Error> for ObjectStoreError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(err.into())
        } else {
            Self::Other(err.into())
        }
    }
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub content_type: Option<String>,
    pub length: u64,
    pub last_modified: EpochMillis,
}

/// One page of a listing. `next` feeds the continuation of the next call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    pub names: Vec<String>,
    pub next: Option<String>,
}

/// State of a cooperative write lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub owner: String,
    pub acquired_at: EpochMillis,
}

/// Storage for asset blobs and database files (local FS, S3 and the like).
///
/// Paths are storage-relative with `/` separators. Writers serialize through
/// the cooperative write-lock operations; readers never take the lock.
#[async_trait]
pub trait ObjectStore: 'static + fmt::Debug + Send + Sync {
    fn is_readonly(&self) -> bool;

    /// Human-readable description of where the store lives (directory path,
    /// bucket URL, ...), used in logs only.
    fn location(&self) -> String;

    /// Returns `true` if no object exists under the given prefix.
    async fn is_empty(&self, prefix: &str) -> Result<bool, ObjectStoreError>;

    async fn file_exists(&self, path: &str) -> Result<bool, ObjectStoreError>;

    async fn dir_exists(&self, path: &str) -> Result<bool, ObjectStoreError>;

    /// Fetches object metadata, or `None` if the object does not exist.
    async fn info(&self, path: &str) -> Result<Option<FileInfo>, ObjectStoreError>;

    /// Lists up to `max` file names directly under `path`, continuing after
    /// the `next` token of a previous page.
    async fn list_files(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListResult, ObjectStoreError>;

    /// Lists up to `max` directory names directly under `path`.
    async fn list_dirs(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListResult, ObjectStoreError>;

    /// Reads the whole object, or `None` if it does not exist.
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ObjectStoreError>;

    /// Stores the object, replacing any previous content atomically.
    async fn write(
        &self,
        path: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<(), ObjectStoreError>;

    /// Opens the object for streaming reads.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::NotFound`] if the object does not exist.
    async fn read_stream(&self, path: &str) -> Result<ObjectStream, ObjectStoreError>;

    /// Streams `content` into the object. The replacement is atomic: readers
    /// observe either the old or the new content, never a prefix.
    async fn write_stream(
        &self,
        path: &str,
        content_type: Option<&str>,
        content: ObjectStream,
        content_length: Option<u64>,
    ) -> Result<(), ObjectStoreError>;

    /// Copies `src` over `dst` within the store.
    async fn copy_to(&self, src: &str, dst: &str) -> Result<(), ObjectStoreError>;

    /// Removes the object if it exists; missing objects are not an error.
    async fn delete_file(&self, path: &str) -> Result<(), ObjectStoreError>;

    /// Removes every object under the prefix.
    async fn delete_dir(&self, path: &str) -> Result<(), ObjectStoreError>;

    /// Reads the current holder of the lock at `path`, if any.
    async fn check_write_lock(&self, path: &str) -> Result<Option<LockInfo>, ObjectStoreError>;

    /// Attempts to take the lock at `path` for `owner`. Returns `false` if
    /// another owner currently holds it.
    async fn acquire_write_lock(&self, path: &str, owner: &str)
        -> Result<bool, ObjectStoreError>;

    async fn release_write_lock(&self, path: &str) -> Result<(), ObjectStoreError>;

    /// Bumps the lock's acquired-at timestamp so that expiry-based takeover
    /// does not fire under a live holder.
    async fn refresh_write_lock(&self, path: &str, owner: &str)
        -> Result<(), ObjectStoreError>;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn is_readonly(&self) -> bool {
        (**self).is_readonly()
    }

    fn location(&self) -> String {
        (**self).location()
    }

    async fn is_empty(&self, prefix: &str) -> Result<bool, ObjectStoreError> {
        (**self).is_empty(prefix).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool, ObjectStoreError> {
        (**self).file_exists(path).await
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, ObjectStoreError> {
        (**self).dir_exists(path).await
    }

    async fn info(&self, path: &str) -> Result<Option<FileInfo>, ObjectStoreError> {
        (**self).info(path).await
    }

    async fn list_files(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListResult, ObjectStoreError> {
        (**self).list_files(path, max, next).await
    }

    async fn list_dirs(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListResult, ObjectStoreError> {
        (**self).list_dirs(path, max, next).await
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        (**self).read(path).await
    }

    async fn write(
        &self,
        path: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<(), ObjectStoreError> {
        (**self).write(path, content_type, bytes).await
    }

    async fn read_stream(&self, path: &str) -> Result<ObjectStream, ObjectStoreError> {
        (**self).read_stream(path).await
    }

    async fn write_stream(
        &self,
        path: &str,
        content_type: Option<&str>,
        content: ObjectStream,
        content_length: Option<u64>,
    ) -> Result<(), ObjectStoreError> {
        (**self)
            .write_stream(path, content_type, content, content_length)
            .await
    }

    async fn copy_to(&self, src: &str, dst: &str) -> Result<(), ObjectStoreError> {
        (**self).copy_to(src, dst).await
    }

    async fn delete_file(&self, path: &str) -> Result<(), ObjectStoreError> {
        (**self).delete_file(path).await
    }

    async fn delete_dir(&self, path: &str) -> Result<(), ObjectStoreError> {
        (**self).delete_dir(path).await
    }

    async fn check_write_lock(&self, path: &str) -> Result<Option<LockInfo>, ObjectStoreError> {
        (**self).check_write_lock(path).await
    }

    async fn acquire_write_lock(
        &self,
        path: &str,
        owner: &str,
    ) -> Result<bool, ObjectStoreError> {
        (**self).acquire_write_lock(path, owner).await
    }

    async fn release_write_lock(&self, path: &str) -> Result<(), ObjectStoreError> {
        (**self).release_write_lock(path).await
    }

    async fn refresh_write_lock(
        &self,
        path: &str,
        owner: &str,
    ) -> Result<(), ObjectStoreError> {
        (**self).refresh_write_lock(path, owner).await
    }
}

#[derive(Debug)]
enum ObjectStoreOrigin {
    Config(ObjectStoreConfig),
    Mock(Arc<MockStore>),
}

/// Factory of [`ObjectStore`]s.
#[derive(Debug)]
pub struct ObjectStoreFactory {
    origin: ObjectStoreOrigin,
}

impl ObjectStoreFactory {
    /// Creates an object store factory based on the provided `config`.
    pub fn new(config: ObjectStoreConfig) -> Self {
        Self {
            origin: ObjectStoreOrigin::Config(config),
        }
    }

    /// Creates an object store factory with a mock in-memory store.
    /// All calls to [`Self::create_store()`] will return the same store; thus,
    /// the testing code can use [`ObjectStore`] methods for assertions.
    pub fn mock() -> Self {
        Self {
            origin: ObjectStoreOrigin::Mock(Arc::new(MockStore::default())),
        }
    }

    /// Creates an [`ObjectStore`].
    pub async fn create_store(&self) -> Arc<dyn ObjectStore> {
        match &self.origin {
            ObjectStoreOrigin::Config(config) => Self::create_from_config(config).await,
            ObjectStoreOrigin::Mock(store) => Arc::new(Arc::clone(store)),
        }
    }

    async fn create_from_config(config: &ObjectStoreConfig) -> Arc<dyn ObjectStore> {
        match config.mode {
            ObjectStoreMode::FileBacked => {
                vault_logs::info!("Initialized FileBacked object store");
                let store =
                    FileBackedObjectStore::new(config.file_backed_base_path.clone()).await;
                Arc::new(store)
            }
        }
    }
}
