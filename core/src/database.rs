//! The asset database facade: binds one Merkle tree to an object store and
//! chooses the device-scoped tree location, with a fallback to the legacy
//! root location for databases created before device scoping.

use std::sync::Arc;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncReadExt as _, sync::Mutex};
use vault_basic_types::TreeId;
use vault_config::DatabaseConfig;
use vault_merkle_tree::{
    decode_tree, encode_tree, version_from_prefix, FileEntry, MerkleTree,
};
use vault_object_store::{ObjectStore, ObjectStoreError};
use vault_utils::hash::{hash_async_reader, hash_bytes};

use crate::retry::{with_retry, RetryPolicy};

/// Legacy tree location, used by pre-device databases.
pub const LEGACY_TREE_PATH: &str = "tree.dat";
/// Sidecar persisting the block-graph heads.
pub const HEAD_BLOCKS_PATH: &str = "metadata/head-blocks.json";
/// Listing page size when walking storage directories.
const LIST_PAGE_SIZE: usize = 1_000;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeadBlocks {
    head_block_ids: Vec<String>,
}

#[derive(Debug)]
pub struct AssetDatabase {
    store: Arc<dyn ObjectStore>,
    config: DatabaseConfig,
    retry: RetryPolicy,
    tree: Option<MerkleTree>,
}

impl AssetDatabase {
    pub fn new(store: Arc<dyn ObjectStore>, config: DatabaseConfig) -> Self {
        Self {
            store,
            config,
            retry: RetryPolicy::default(),
            tree: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn device_tree_path(&self) -> String {
        format!("devices/{}/{LEGACY_TREE_PATH}", self.config.device_id)
    }

    /// Initializes an empty tree in an empty storage namespace.
    ///
    /// # Errors
    ///
    /// Fails if the store already holds any object, or if the database is
    /// configured read-only.
    pub async fn create(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.config.readonly, "database is read-only");
        let empty = self
            .store
            .is_empty("")
            .await
            .context("failed checking whether the store is empty")?;
        anyhow::ensure!(
            empty,
            "cannot create an asset database in non-empty storage at {}",
            self.store.location()
        );

        self.tree = Some(MerkleTree::create(TreeId::generate()));
        self.save().await?;
        vault_logs::info!(
            "created asset database for device {}",
            self.config.device_id
        );
        Ok(())
    }

    /// Loads the tree, preferring the device-scoped location. Returns whether
    /// a tree was found; corruption is fatal.
    pub async fn load(&mut self) -> anyhow::Result<bool> {
        for path in [self.device_tree_path(), LEGACY_TREE_PATH.to_string()] {
            let bytes = with_retry(self.retry, "loading the tree file", || {
                self.store.read(&path)
            })
            .await
            .with_context(|| format!("failed reading tree file `{path}`"))?;
            if let Some(bytes) = bytes {
                let tree = decode_tree(&bytes)
                    .with_context(|| format!("tree file `{path}` is corrupted"))?;
                vault_logs::info!(
                    "loaded tree from `{path}`: {} files, {} bytes",
                    tree.metadata().total_files,
                    tree.metadata().total_size
                );
                self.tree = Some(tree);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Persists the tree to the device-scoped location. A tree loaded from an
    /// older format version migrates to the current one here, never on load.
    pub async fn save(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.config.readonly, "database is read-only");
        let tree = self.tree.as_ref().context("no tree is loaded")?;
        let bytes = encode_tree(tree);
        let path = self.device_tree_path();
        with_retry(self.retry, "saving the tree file", || {
            self.store
                .write(&path, Some("application/octet-stream"), bytes.clone())
        })
        .await
        .with_context(|| format!("failed writing tree file `{path}`"))?;
        Ok(())
    }

    /// Reads the on-disk format version from the first bytes of the tree
    /// file without loading it. `None` if no tree file exists.
    pub async fn probe_tree_version(&self) -> anyhow::Result<Option<u32>> {
        for path in [self.device_tree_path(), LEGACY_TREE_PATH.to_string()] {
            let mut stream = match self.store.read_stream(&path).await {
                Ok(stream) => stream,
                Err(ObjectStoreError::NotFound(_)) => continue,
                Err(err) => return Err(err).context("failed opening tree file"),
            };
            let mut prefix = [0_u8; 4];
            stream
                .read_exact(&mut prefix)
                .await
                .context("tree file is shorter than its version header")?;
            drop(stream);
            let version = version_from_prefix(&prefix)
                .context("failed decoding tree version header")?;
            return Ok(Some(version));
        }
        Ok(None)
    }

    pub fn is_loaded(&self) -> bool {
        self.tree.is_some()
    }

    /// # Errors
    ///
    /// Fails if the database was neither created nor loaded.
    pub fn merkle_tree(&self) -> anyhow::Result<&MerkleTree> {
        self.tree.as_ref().context("no tree is loaded")
    }

    pub fn merkle_tree_mut(&mut self) -> anyhow::Result<&mut MerkleTree> {
        self.tree.as_mut().context("no tree is loaded")
    }

    pub fn file_count(&self) -> u32 {
        self.tree
            .as_ref()
            .map_or(0, |tree| tree.metadata().total_files)
    }

    pub fn total_size(&self) -> u64 {
        self.tree
            .as_ref()
            .map_or(0, |tree| tree.metadata().total_size)
    }

    pub fn add_file(&mut self, file: FileEntry) -> anyhow::Result<()> {
        self.merkle_tree_mut()?.add_file(file)?;
        Ok(())
    }

    pub fn upsert_file(&mut self, file: FileEntry) -> anyhow::Result<bool> {
        Ok(self.merkle_tree_mut()?.upsert_file(file)?)
    }

    /// Tombstones one file; `false` when the tree does not know the name.
    pub fn delete_file(&mut self, name: &str) -> anyhow::Result<bool> {
        Ok(self.merkle_tree_mut()?.mark_file_as_deleted(name))
    }

    /// Tombstones every tree leaf under `prefix` by walking the storage
    /// listing (paginated).
    pub async fn delete_dir(&mut self, prefix: &str) -> anyhow::Result<u64> {
        let mut deleted = 0_u64;
        let mut pending_dirs = vec![prefix.trim_end_matches('/').to_string()];
        while let Some(dir) = pending_dirs.pop() {
            let mut next: Option<String> = None;
            loop {
                let page = self
                    .store
                    .list_files(&dir, LIST_PAGE_SIZE, next.as_deref())
                    .await
                    .with_context(|| format!("failed listing files under `{dir}`"))?;
                for name in &page.names {
                    let path = join_path(&dir, name);
                    if self.merkle_tree_mut()?.mark_file_as_deleted(&path) {
                        deleted += 1;
                    }
                }
                match page.next {
                    Some(token) => next = Some(token),
                    None => break,
                }
            }

            let mut next: Option<String> = None;
            loop {
                let page = self
                    .store
                    .list_dirs(&dir, LIST_PAGE_SIZE, next.as_deref())
                    .await
                    .with_context(|| format!("failed listing dirs under `{dir}`"))?;
                for name in &page.names {
                    pending_dirs.push(join_path(&dir, name));
                }
                match page.next {
                    Some(token) => next = Some(token),
                    None => break,
                }
            }
        }
        Ok(deleted)
    }

    /// Loads the persisted block-graph heads; absent sidecar reads as empty.
    pub async fn load_head_blocks(&self) -> anyhow::Result<Vec<String>> {
        let bytes = self
            .store
            .read(HEAD_BLOCKS_PATH)
            .await
            .context("failed reading head blocks")?;
        let Some(bytes) = bytes else {
            return Ok(Vec::new());
        };
        let heads: HeadBlocks =
            serde_json::from_slice(&bytes).context("head blocks sidecar is corrupted")?;
        Ok(heads.head_block_ids)
    }

    pub async fn save_head_blocks(&self, head_block_ids: &[String]) -> anyhow::Result<()> {
        let heads = HeadBlocks {
            head_block_ids: head_block_ids.to_vec(),
        };
        let bytes = serde_json::to_vec(&heads).context("failed encoding head blocks")?;
        self.store
            .write(HEAD_BLOCKS_PATH, Some("application/json"), bytes)
            .await
            .context("failed writing head blocks")?;
        Ok(())
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Paths the decorator keeps out of the tree: database internals and the
/// metadata namespace.
fn is_tracked_path(path: &str) -> bool {
    !(path.starts_with("metadata/")
        || path.starts_with("devices/")
        || path.starts_with('.')
        || path == LEGACY_TREE_PATH)
}

/// Decorator over an [`ObjectStore`] that mirrors every asset write into the
/// Merkle tree: written files are re-hashed and upserted, deletions are
/// tombstoned before the storage delete. Metadata and database-internal
/// paths pass through untouched.
#[derive(Debug)]
pub struct AssetDatabaseStorage {
    inner: Arc<dyn ObjectStore>,
    database: Arc<Mutex<AssetDatabase>>,
    read_only: bool,
}

impl AssetDatabaseStorage {
    pub fn new(
        inner: Arc<dyn ObjectStore>,
        database: Arc<Mutex<AssetDatabase>>,
        read_only: bool,
    ) -> Self {
        Self {
            inner,
            database,
            read_only,
        }
    }

    async fn record_write(&self, path: &str) -> Result<(), ObjectStoreError> {
        if self.read_only || !is_tracked_path(path) {
            return Ok(());
        }
        let info = self.inner.info(path).await?.ok_or_else(|| {
            ObjectStoreError::Other(format!("uploaded object `{path}` vanished").into())
        })?;
        let stream = self.inner.read_stream(path).await?;
        let hash = hash_async_reader(stream)
            .await
            .map_err(|err| ObjectStoreError::Other(err.into()))?;

        let mut database = self.database.lock().await;
        let result = database.upsert_file(FileEntry {
            name: path.to_string(),
            hash,
            length: info.length,
            last_modified: info.last_modified,
        });
        result.map_err(|err| ObjectStoreError::Other(err.into()))?;
        Ok(())
    }

    async fn record_delete(&self, path: &str) -> Result<(), ObjectStoreError> {
        if self.read_only || !is_tracked_path(path) {
            return Ok(());
        }
        let mut database = self.database.lock().await;
        match database.merkle_tree_mut() {
            Ok(tree) => {
                tree.mark_file_as_deleted(path);
                Ok(())
            }
            Err(err) => Err(ObjectStoreError::Other(err.into())),
        }
    }

    async fn record_delete_dir(&self, path: &str) -> Result<(), ObjectStoreError> {
        if self.read_only || !is_tracked_path(path) {
            return Ok(());
        }
        let mut database = self.database.lock().await;
        database
            .delete_dir(path)
            .await
            .map_err(|err| ObjectStoreError::Other(err.into()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStore for AssetDatabaseStorage {
    fn is_readonly(&self) -> bool {
        self.read_only || self.inner.is_readonly()
    }

    fn location(&self) -> String {
        self.inner.location()
    }

    async fn is_empty(&self, prefix: &str) -> Result<bool, ObjectStoreError> {
        self.inner.is_empty(prefix).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool, ObjectStoreError> {
        self.inner.file_exists(path).await
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, ObjectStoreError> {
        self.inner.dir_exists(path).await
    }

    async fn info(
        &self,
        path: &str,
    ) -> Result<Option<vault_object_store::FileInfo>, ObjectStoreError> {
        self.inner.info(path).await
    }

    async fn list_files(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<vault_object_store::ListResult, ObjectStoreError> {
        self.inner.list_files(path, max, next).await
    }

    async fn list_dirs(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<vault_object_store::ListResult, ObjectStoreError> {
        self.inner.list_dirs(path, max, next).await
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        self.inner.read(path).await
    }

    async fn write(
        &self,
        path: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<(), ObjectStoreError> {
        // The hash of in-memory content is free; streamed writes re-read from
        // the inner store instead.
        let tracked = !self.read_only && is_tracked_path(path);
        let hash = if tracked { Some(hash_bytes(&bytes)) } else { None };
        self.inner.write(path, content_type, bytes).await?;
        let Some(hash) = hash else {
            return Ok(());
        };
        let info = self.inner.info(path).await?.ok_or_else(|| {
            ObjectStoreError::Other(format!("uploaded object `{path}` vanished").into())
        })?;
        let mut database = self.database.lock().await;
        database
            .upsert_file(FileEntry {
                name: path.to_string(),
                hash,
                length: info.length,
                last_modified: info.last_modified,
            })
            .map_err(|err| ObjectStoreError::Other(err.into()))?;
        Ok(())
    }

    async fn read_stream(
        &self,
        path: &str,
    ) -> Result<vault_object_store::ObjectStream, ObjectStoreError> {
        self.inner.read_stream(path).await
    }

    async fn write_stream(
        &self,
        path: &str,
        content_type: Option<&str>,
        content: vault_object_store::ObjectStream,
        content_length: Option<u64>,
    ) -> Result<(), ObjectStoreError> {
        self.inner
            .write_stream(path, content_type, content, content_length)
            .await?;
        self.record_write(path).await
    }

    async fn copy_to(&self, src: &str, dst: &str) -> Result<(), ObjectStoreError> {
        self.inner.copy_to(src, dst).await?;
        self.record_write(dst).await
    }

    async fn delete_file(&self, path: &str) -> Result<(), ObjectStoreError> {
        self.record_delete(path).await?;
        self.inner.delete_file(path).await
    }

    async fn delete_dir(&self, path: &str) -> Result<(), ObjectStoreError> {
        self.record_delete_dir(path).await?;
        self.inner.delete_dir(path).await
    }

    async fn check_write_lock(
        &self,
        path: &str,
    ) -> Result<Option<vault_object_store::LockInfo>, ObjectStoreError> {
        self.inner.check_write_lock(path).await
    }

    async fn acquire_write_lock(
        &self,
        path: &str,
        owner: &str,
    ) -> Result<bool, ObjectStoreError> {
        self.inner.acquire_write_lock(path, owner).await
    }

    async fn release_write_lock(&self, path: &str) -> Result<(), ObjectStoreError> {
        self.inner.release_write_lock(path).await
    }

    async fn refresh_write_lock(
        &self,
        path: &str,
        owner: &str,
    ) -> Result<(), ObjectStoreError> {
        self.inner.refresh_write_lock(path, owner).await
    }
}

#[cfg(test)]
mod tests {
    use vault_object_store::MockStore;

    use super::*;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            device_id: "dev-1".to_string(),
            readonly: false,
        }
    }

    fn mock_store() -> Arc<dyn ObjectStore> {
        Arc::new(MockStore::default())
    }

    async fn created_database(store: &Arc<dyn ObjectStore>) -> AssetDatabase {
        let mut database = AssetDatabase::new(Arc::clone(store), config());
        database.create().await.unwrap();
        database
    }

    fn sample_entry(name: &str) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            hash: hash_bytes(name.as_bytes()),
            length: 10,
            last_modified: 1,
        }
    }

    #[tokio::test]
    async fn create_requires_empty_storage() {
        let store = mock_store();
        store.write("stray", None, vec![1]).await.unwrap();
        let mut database = AssetDatabase::new(Arc::clone(&store), config());
        assert!(database.create().await.is_err());
        assert!(!database.is_loaded());
    }

    #[tokio::test]
    async fn saves_to_the_device_scoped_path() {
        let store = mock_store();
        let mut database = created_database(&store).await;
        database.add_file(sample_entry("asset/a1")).unwrap();
        database.save().await.unwrap();

        assert!(store
            .file_exists("devices/dev-1/tree.dat")
            .await
            .unwrap());
        assert_eq!(database.probe_tree_version().await.unwrap(), Some(4));

        let mut reloaded = AssetDatabase::new(Arc::clone(&store), config());
        assert!(reloaded.load().await.unwrap());
        assert_eq!(reloaded.file_count(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_the_legacy_location() {
        let store = mock_store();
        let mut tree = MerkleTree::create(TreeId::generate());
        tree.add_file(sample_entry("asset/legacy")).unwrap();
        store
            .write(LEGACY_TREE_PATH, None, encode_tree(&tree))
            .await
            .unwrap();

        let mut database = AssetDatabase::new(Arc::clone(&store), config());
        assert!(database.load().await.unwrap());
        assert_eq!(database.file_count(), 1);

        // Saving moves the tree to the device-scoped location.
        database.save().await.unwrap();
        assert!(store
            .file_exists("devices/dev-1/tree.dat")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn load_reports_absence_and_corruption() {
        let store = mock_store();
        let mut database = AssetDatabase::new(Arc::clone(&store), config());
        assert!(!database.load().await.unwrap());
        assert!(database.merkle_tree().is_err());

        store
            .write("devices/dev-1/tree.dat", None, vec![4, 0, 0, 0, 9])
            .await
            .unwrap();
        assert!(database.load().await.is_err());
    }

    #[tokio::test]
    async fn delete_dir_tombstones_every_leaf_under_the_prefix() {
        let store = mock_store();
        let mut database = created_database(&store).await;
        for path in ["asset/a1", "asset/a2", "thumb/a1"] {
            store.write(path, None, vec![1]).await.unwrap();
            database.add_file(sample_entry(path)).unwrap();
        }

        let deleted = database.delete_dir("asset").await.unwrap();
        assert_eq!(deleted, 2);
        let tree = database.merkle_tree().unwrap();
        assert!(tree.find_node_ref("asset/a1").unwrap().is_deleted);
        assert!(tree.find_node_ref("asset/a2").unwrap().is_deleted);
        assert!(!tree.find_node_ref("thumb/a1").unwrap().is_deleted);
    }

    #[tokio::test]
    async fn head_blocks_round_trip() {
        let store = mock_store();
        let database = created_database(&store).await;
        assert!(database.load_head_blocks().await.unwrap().is_empty());

        let heads = vec!["block-1".to_string(), "block-2".to_string()];
        database.save_head_blocks(&heads).await.unwrap();
        assert_eq!(database.load_head_blocks().await.unwrap(), heads);

        // The sidecar is plain UTF-8 JSON with the single documented field.
        let bytes = store.read(HEAD_BLOCKS_PATH).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["headBlockIds"][0], "block-1");
    }

    #[tokio::test]
    async fn decorator_mirrors_writes_and_deletes() {
        let store = mock_store();
        let database = Arc::new(Mutex::new(created_database(&store).await));
        let storage =
            AssetDatabaseStorage::new(Arc::clone(&store), Arc::clone(&database), false);

        storage
            .write("asset/a1", Some("image/jpeg"), b"content".to_vec())
            .await
            .unwrap();
        {
            let db = database.lock().await;
            let tree = db.merkle_tree().unwrap();
            let leaf = tree.find_file_node("asset/a1").unwrap();
            assert_eq!(leaf.hash, hash_bytes(b"content"));
            assert_eq!(leaf.size, 7);
        }

        // Same content rewritten: upsert keeps a single leaf.
        storage
            .write("asset/a1", Some("image/jpeg"), b"content-v2".to_vec())
            .await
            .unwrap();
        storage.copy_to("asset/a1", "asset/a2").await.unwrap();
        {
            let db = database.lock().await;
            let tree = db.merkle_tree().unwrap();
            assert_eq!(tree.metadata().total_files, 2);
            assert_eq!(
                tree.find_file_node("asset/a2").unwrap().hash,
                hash_bytes(b"content-v2")
            );
        }

        storage.delete_file("asset/a1").await.unwrap();
        {
            let db = database.lock().await;
            let tree = db.merkle_tree().unwrap();
            assert!(tree.find_node_ref("asset/a1").unwrap().is_deleted);
        }
        assert!(!store.file_exists("asset/a1").await.unwrap());
    }

    #[tokio::test]
    async fn decorator_passes_untracked_paths_through() {
        let store = mock_store();
        let database = Arc::new(Mutex::new(created_database(&store).await));
        let storage =
            AssetDatabaseStorage::new(Arc::clone(&store), Arc::clone(&database), false);

        storage
            .write("metadata/record.bson", None, vec![1, 2, 3])
            .await
            .unwrap();
        let db = database.lock().await;
        assert_eq!(db.merkle_tree().unwrap().metadata().total_files, 0);
    }

    #[tokio::test]
    async fn read_only_decorator_suppresses_tree_updates() {
        let store = mock_store();
        let database = Arc::new(Mutex::new(created_database(&store).await));
        let storage =
            AssetDatabaseStorage::new(Arc::clone(&store), Arc::clone(&database), true);

        storage.write("asset/a1", None, vec![1]).await.unwrap();
        let db = database.lock().await;
        assert_eq!(db.merkle_tree().unwrap().metadata().total_files, 0);
    }
}
