//! Object store implementation based on the local file system.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{
    fs,
    io::{self, AsyncWriteExt},
};
use vault_utils::time::millis_since_epoch;

use crate::raw::{
    FileInfo, ListResult, LockInfo, ObjectStore, ObjectStoreError, ObjectStream,
};

/// Directory (relative to the store root) holding content-type sidecars.
/// Dot-prefixed so that listings skip it.
const TYPES_DIR: &str = ".types";

#[derive(Debug)]
pub struct FileBackedObjectStore {
    base_dir: PathBuf,
    readonly: bool,
}

impl FileBackedObjectStore {
    pub async fn new(base_dir: String) -> Self {
        let base_dir = PathBuf::from(base_dir);
        fs::create_dir_all(&base_dir)
            .await
            .expect("failed to create base directory for the object store");
        Self {
            base_dir,
            readonly: false,
        }
    }

    pub async fn new_readonly(base_dir: String) -> Self {
        let mut this = Self::new(base_dir).await;
        this.readonly = true;
        this
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_dir.join(path)
    }

    fn type_sidecar_path(&self, path: &str) -> PathBuf {
        self.base_dir.join(TYPES_DIR).join(path)
    }

    fn check_writable(&self) -> Result<(), ObjectStoreError> {
        if self.readonly {
            return Err(ObjectStoreError::ReadOnly);
        }
        Ok(())
    }

    /// Names starting with a dot are store-internal (sidecars, lock scratch)
    /// and never surface through listings.
    fn is_visible(name: &str) -> bool {
        !name.starts_with('.')
    }

    async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), ObjectStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = tmp_path_for(path);
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn store_content_type(
        &self,
        path: &str,
        content_type: Option<&str>,
    ) -> Result<(), ObjectStoreError> {
        match content_type {
            Some(content_type) => {
                Self::write_atomically(&self.type_sidecar_path(path), content_type.as_bytes())
                    .await
            }
            None => Ok(()),
        }
    }

    async fn load_content_type(&self, path: &str) -> Result<Option<String>, ObjectStoreError> {
        match fs::read_to_string(self.type_sidecar_path(path)).await {
            Ok(content_type) => Ok(Some(content_type)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_entries(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
        want_dirs: bool,
    ) -> Result<ListResult, ObjectStoreError> {
        let full_path = self.full_path(path);
        let mut entries = match fs::read_dir(&full_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(ListResult::default())
            }
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !Self::is_visible(&name) {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() == want_dirs {
                names.push(name);
            }
        }
        names.sort_unstable();
        if let Some(next) = next {
            names.retain(|name| name.as_str() > next);
        }

        let has_more = names.len() > max;
        names.truncate(max);
        let next = if has_more { names.last().cloned() } else { None };
        Ok(ListResult { names, next })
    }

    fn is_empty_dir<'a>(
        dir: &'a Path,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool, ObjectStoreError>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut entries = match fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !Self::is_visible(&name) {
                    continue;
                }
                if entry.file_type().await?.is_dir() {
                    if !Self::is_empty_dir(&entry.path()).await? {
                        return Ok(false);
                    }
                } else {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    file_name.insert(0, '.');
    file_name.push_str(".tmp");
    path.with_file_name(file_name)
}

fn modified_millis(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |duration| duration.as_millis() as u64)
}

#[async_trait]
impl ObjectStore for FileBackedObjectStore {
    fn is_readonly(&self) -> bool {
        self.readonly
    }

    fn location(&self) -> String {
        self.base_dir.display().to_string()
    }

    async fn is_empty(&self, prefix: &str) -> Result<bool, ObjectStoreError> {
        Self::is_empty_dir(&self.full_path(prefix)).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool, ObjectStoreError> {
        match fs::metadata(self.full_path(path)).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, ObjectStoreError> {
        match fs::metadata(self.full_path(path)).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn info(&self, path: &str) -> Result<Option<FileInfo>, ObjectStoreError> {
        let metadata = match fs::metadata(self.full_path(path)).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(FileInfo {
            content_type: self.load_content_type(path).await?,
            length: metadata.len(),
            last_modified: modified_millis(&metadata),
        }))
    }

    async fn list_files(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListResult, ObjectStoreError> {
        self.list_entries(path, max, next, false).await
    }

    async fn list_dirs(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListResult, ObjectStoreError> {
        self.list_entries(path, max, next, true).await
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        match fs::read(self.full_path(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(
        &self,
        path: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<(), ObjectStoreError> {
        self.check_writable()?;
        Self::write_atomically(&self.full_path(path), &bytes).await?;
        self.store_content_type(path, content_type).await
    }

    async fn read_stream(&self, path: &str) -> Result<ObjectStream, ObjectStoreError> {
        match fs::File::open(self.full_path(path)).await {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(ObjectStoreError::not_found(path))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write_stream(
        &self,
        path: &str,
        content_type: Option<&str>,
        mut content: ObjectStream,
        content_length: Option<u64>,
    ) -> Result<(), ObjectStoreError> {
        self.check_writable()?;
        let full_path = self.full_path(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = tmp_path_for(&full_path);
        let mut file = fs::File::create(&tmp_path).await?;
        let written = io::copy(&mut content, &mut file).await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = content_length {
            if written != expected {
                fs::remove_file(&tmp_path).await.ok();
                return Err(ObjectStoreError::Other(
                    format!("expected {expected} bytes in stream, received {written}").into(),
                ));
            }
        }
        fs::rename(&tmp_path, &full_path).await?;
        self.store_content_type(path, content_type).await
    }

    async fn copy_to(&self, src: &str, dst: &str) -> Result<(), ObjectStoreError> {
        self.check_writable()?;
        let bytes = self
            .read(src)
            .await?
            .ok_or_else(|| ObjectStoreError::not_found(src))?;
        let content_type = self.load_content_type(src).await?;
        Self::write_atomically(&self.full_path(dst), &bytes).await?;
        self.store_content_type(dst, content_type.as_deref()).await
    }

    async fn delete_file(&self, path: &str) -> Result<(), ObjectStoreError> {
        self.check_writable()?;
        match fs::remove_file(self.full_path(path)).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        match fs::remove_file(self.type_sidecar_path(path)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_dir(&self, path: &str) -> Result<(), ObjectStoreError> {
        self.check_writable()?;
        for dir in [self.full_path(path), self.type_sidecar_path(path)] {
            match fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn check_write_lock(&self, path: &str) -> Result<Option<LockInfo>, ObjectStoreError> {
        let bytes = match fs::read(self.full_path(path)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let info = serde_json::from_slice(&bytes)
            .map_err(|err| ObjectStoreError::Other(err.into()))?;
        Ok(Some(info))
    }

    async fn acquire_write_lock(
        &self,
        path: &str,
        owner: &str,
    ) -> Result<bool, ObjectStoreError> {
        self.check_writable()?;
        let full_path = self.full_path(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // `create_new` makes the existence check and the creation one atomic
        // step, so two contending processes cannot both win.
        let open_result = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await;
        let mut file = match open_result {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let info = LockInfo {
            owner: owner.to_string(),
            acquired_at: millis_since_epoch(),
        };
        let bytes = serde_json::to_vec(&info)
            .map_err(|err| ObjectStoreError::Other(err.into()))?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        Ok(true)
    }

    async fn release_write_lock(&self, path: &str) -> Result<(), ObjectStoreError> {
        self.check_writable()?;
        match fs::remove_file(self.full_path(path)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn refresh_write_lock(
        &self,
        path: &str,
        owner: &str,
    ) -> Result<(), ObjectStoreError> {
        self.check_writable()?;
        let info = LockInfo {
            owner: owner.to_string(),
            acquired_at: millis_since_epoch(),
        };
        let bytes = serde_json::to_vec(&info)
            .map_err(|err| ObjectStoreError::Other(err.into()))?;
        Self::write_atomically(&self.full_path(path), &bytes).await
    }
}
