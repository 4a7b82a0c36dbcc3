//! Abstract object storage for asset blobs and database files, with
//! file-backed and in-memory implementations.

mod file;
mod mock;
mod raw;

pub use self::{
    file::FileBackedObjectStore,
    mock::MockStore,
    raw::{
        BoxedError, FileInfo, ListResult, LockInfo, ObjectStore, ObjectStoreError,
        ObjectStoreFactory, ObjectStream,
    },
};
