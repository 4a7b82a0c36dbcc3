//! In-memory store for testing. All state lives behind one mutex; the store
//! is cheap to clone through [`crate::ObjectStoreFactory::mock`].

use std::{
    collections::BTreeMap,
    sync::Mutex,
};

use async_trait::async_trait;
use vault_utils::time::millis_since_epoch;

use crate::raw::{
    FileInfo, ListResult, LockInfo, ObjectStore, ObjectStoreError, ObjectStream,
};

#[derive(Debug, Clone)]
struct StoredObject {
    content_type: Option<String>,
    bytes: Vec<u8>,
    last_modified: u64,
}

#[derive(Debug, Default)]
struct MockStoreInner {
    objects: BTreeMap<String, StoredObject>,
    locks: BTreeMap<String, LockInfo>,
}

#[derive(Debug, Default)]
pub struct MockStore {
    inner: Mutex<MockStoreInner>,
}

fn prefix_of(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{path}/")
    }
}

impl MockStore {
    /// Lists unique names one level below `path`; `files` selects leaf names
    /// vs. intermediate directory names.
    fn list(&self, path: &str, max: usize, next: Option<&str>, files: bool) -> ListResult {
        let prefix = prefix_of(path);
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner
            .objects
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(&prefix)?;
                let is_file = !rest.contains('/');
                if files {
                    is_file.then(|| rest.to_owned())
                } else {
                    let (dir, _) = rest.split_once('/')?;
                    Some(dir.to_owned())
                }
            })
            .collect();
        names.sort_unstable();
        names.dedup();
        if let Some(next) = next {
            names.retain(|name| name.as_str() > next);
        }
        let has_more = names.len() > max;
        names.truncate(max);
        let next = if has_more { names.last().cloned() } else { None };
        ListResult { names, next }
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    fn is_readonly(&self) -> bool {
        false
    }

    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn is_empty(&self, prefix: &str) -> Result<bool, ObjectStoreError> {
        let prefix = prefix_of(prefix);
        let inner = self.inner.lock().unwrap();
        Ok(!inner.objects.keys().any(|key| key.starts_with(&prefix)))
    }

    async fn file_exists(&self, path: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.inner.lock().unwrap().objects.contains_key(path))
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, ObjectStoreError> {
        let prefix = prefix_of(path);
        let inner = self.inner.lock().unwrap();
        Ok(inner.objects.keys().any(|key| key.starts_with(&prefix)))
    }

    async fn info(&self, path: &str) -> Result<Option<FileInfo>, ObjectStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.objects.get(path).map(|object| FileInfo {
            content_type: object.content_type.clone(),
            length: object.bytes.len() as u64,
            last_modified: object.last_modified,
        }))
    }

    async fn list_files(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListResult, ObjectStoreError> {
        Ok(self.list(path, max, next, true))
    }

    async fn list_dirs(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListResult, ObjectStoreError> {
        Ok(self.list(path, max, next, false))
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.objects.get(path).map(|object| object.bytes.clone()))
    }

    async fn write(
        &self,
        path: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<(), ObjectStoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(
            path.to_string(),
            StoredObject {
                content_type: content_type.map(str::to_owned),
                bytes,
                last_modified: millis_since_epoch(),
            },
        );
        Ok(())
    }

    async fn read_stream(&self, path: &str) -> Result<ObjectStream, ObjectStoreError> {
        let bytes = self
            .read(path)
            .await?
            .ok_or_else(|| ObjectStoreError::not_found(path))?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    async fn write_stream(
        &self,
        path: &str,
        content_type: Option<&str>,
        mut content: ObjectStream,
        content_length: Option<u64>,
    ) -> Result<(), ObjectStoreError> {
        use tokio::io::AsyncReadExt as _;

        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes).await?;
        if let Some(expected) = content_length {
            if bytes.len() as u64 != expected {
                return Err(ObjectStoreError::Other(
                    format!(
                        "expected {expected} bytes in stream, received {}",
                        bytes.len()
                    )
                    .into(),
                ));
            }
        }
        self.write(path, content_type, bytes).await
    }

    async fn copy_to(&self, src: &str, dst: &str) -> Result<(), ObjectStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut object = inner
            .objects
            .get(src)
            .cloned()
            .ok_or_else(|| ObjectStoreError::not_found(src))?;
        object.last_modified = millis_since_epoch();
        inner.objects.insert(dst.to_string(), object);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), ObjectStoreError> {
        self.inner.lock().unwrap().objects.remove(path);
        Ok(())
    }

    async fn delete_dir(&self, path: &str) -> Result<(), ObjectStoreError> {
        let prefix = prefix_of(path);
        let mut inner = self.inner.lock().unwrap();
        inner.objects.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    async fn check_write_lock(&self, path: &str) -> Result<Option<LockInfo>, ObjectStoreError> {
        Ok(self.inner.lock().unwrap().locks.get(path).cloned())
    }

    async fn acquire_write_lock(
        &self,
        path: &str,
        owner: &str,
    ) -> Result<bool, ObjectStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.locks.contains_key(path) {
            return Ok(false);
        }
        inner.locks.insert(
            path.to_string(),
            LockInfo {
                owner: owner.to_string(),
                acquired_at: millis_since_epoch(),
            },
        );
        Ok(true)
    }

    async fn release_write_lock(&self, path: &str) -> Result<(), ObjectStoreError> {
        self.inner.lock().unwrap().locks.remove(path);
        Ok(())
    }

    async fn refresh_write_lock(
        &self,
        path: &str,
        owner: &str,
    ) -> Result<(), ObjectStoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.locks.insert(
            path.to_string(),
            LockInfo {
                owner: owner.to_string(),
                acquired_at: millis_since_epoch(),
            },
        );
        Ok(())
    }
}
