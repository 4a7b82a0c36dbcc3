//! Worker stages of the import pipeline: `hash-file` and `import-file`.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use rand::Rng as _;
use vault_basic_types::{AssetId, ContentHash};
use vault_config::SimulatedFailure;
use vault_dal::DocumentStore;
use vault_hash_cache::HashCache;
use vault_object_store::ObjectStore;
use vault_task_queue::{async_trait, TaskHandler};
use vault_types::{AssetData, AssetRecord, MediaInfo, ScannedFile, UploadedArtifact};
use vault_utils::{
    hash::{hash_async_reader, hash_file},
    time::millis_since_epoch,
};

use crate::contracts::{Geocoder, MediaAnalyzer};

/// Cache key of a scanned file: its real on-disk path, normalized.
pub(crate) fn cache_key(file: &ScannedFile) -> String {
    vault_utils::collate::normalize_path(&file.file_path.to_string_lossy())
}

#[derive(Debug, Clone)]
pub struct HashFileTask {
    pub asset_id: AssetId,
    pub file: ScannedFile,
}

#[derive(Debug)]
pub struct HashFileOutput {
    pub hash: ContentHash,
    pub from_cache: bool,
    pub already_in_database: bool,
}

/// Hashes one file, preferring the on-disk cache, and checks whether the
/// content is already recorded in the metadata store.
#[derive(Debug)]
pub struct HashFileHandler {
    cache_path: PathBuf,
    documents: Arc<dyn DocumentStore>,
}

impl HashFileHandler {
    pub fn new(cache_path: PathBuf, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            cache_path,
            documents,
        }
    }
}

#[async_trait]
impl TaskHandler for HashFileHandler {
    type Task = HashFileTask;
    type Output = HashFileOutput;

    const SERVICE_NAME: &'static str = "hash-file";

    async fn handle(&self, task: HashFileTask) -> anyhow::Result<HashFileOutput> {
        // Each task opens its own read-only snapshot; the driver owns the
        // writable cache and persists it on its side of the channel.
        let cache_path = self.cache_path.clone();
        let cache = tokio::task::spawn_blocking(move || HashCache::load(cache_path, true))
            .await
            .context("hash cache load task failed")??;

        let key = cache_key(&task.file);
        let cached = cache.get_hash(&key).filter(|entry| {
            entry.length == task.file.length && entry.last_modified == task.file.last_modified
        });
        let (hash, from_cache) = match cached {
            Some(entry) => (entry.hash, true),
            None => {
                let hash = hash_file(&task.file.file_path)
                    .await
                    .with_context(|| {
                        format!("failed hashing {}", task.file.file_path.display())
                    })?;
                (hash, false)
            }
        };

        let records = self
            .documents
            .find_by_index("hash", &bson::Bson::String(hash.to_hex()))
            .await
            .context("failed querying the metadata store by hash")?;
        Ok(HashFileOutput {
            hash,
            from_cache,
            already_in_database: !records.is_empty(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ImportFileTask {
    pub asset_id: AssetId,
    pub file: ScannedFile,
    pub expected_hash: ContentHash,
}

/// Analyzes the media, uploads the asset and its renditions, verifies the
/// uploaded content against the expected hash, and assembles the metadata
/// record. Any fatal error removes the artifacts uploaded so far.
#[derive(Debug)]
pub struct ImportFileHandler {
    store: Arc<dyn ObjectStore>,
    analyzer: Arc<dyn MediaAnalyzer>,
    geocoder: Option<Arc<dyn Geocoder>>,
    simulate_failure: Option<SimulatedFailure>,
}

impl ImportFileHandler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        analyzer: Arc<dyn MediaAnalyzer>,
        geocoder: Option<Arc<dyn Geocoder>>,
        simulate_failure: Option<SimulatedFailure>,
    ) -> Self {
        Self {
            store,
            analyzer,
            geocoder,
            simulate_failure,
        }
    }

    async fn import(&self, task: &ImportFileTask, uploaded: &mut Vec<String>) -> anyhow::Result<AssetData> {
        let media = self
            .analyzer
            .analyze(&task.file.file_path, &task.file.content_type)
            .await
            .with_context(|| format!("media analysis of {} failed", task.file.logical_path))?;

        let asset_path = format!("asset/{}", task.asset_id);
        let source = tokio::fs::File::open(&task.file.file_path)
            .await
            .with_context(|| format!("failed opening {}", task.file.file_path.display()))?;
        self.store
            .write_stream(
                &asset_path,
                Some(&task.file.content_type),
                Box::new(source),
                Some(task.file.length),
            )
            .await
            .context("failed uploading the asset")?;
        uploaded.push(asset_path.clone());

        let thumb_path = match &media.thumbnail {
            Some(thumbnail) => {
                let path = format!("thumb/{}", task.asset_id);
                self.store
                    .write(&path, Some("image/jpeg"), thumbnail.clone())
                    .await
                    .context("failed uploading the thumbnail")?;
                uploaded.push(path.clone());
                Some(path)
            }
            None => None,
        };
        let display_path = match &media.display {
            Some(display) => {
                let path = format!("display/{}", task.asset_id);
                self.store
                    .write(&path, Some("image/jpeg"), display.clone())
                    .await
                    .context("failed uploading the display rendition")?;
                uploaded.push(path.clone());
                Some(path)
            }
            None => None,
        };

        // Every artifact is re-read from storage: what the tree commits to is
        // what the store actually holds.
        let asset = self.uploaded_artifact(&asset_path).await?;
        anyhow::ensure!(
            asset.hash == task.expected_hash,
            "uploaded asset hash {} does not match the expected {}",
            asset.hash,
            task.expected_hash
        );
        if let Some(SimulatedFailure::AddFile) = self.simulate_failure {
            if rand::thread_rng().gen_bool(0.1) {
                anyhow::bail!("simulated add-file failure");
            }
        }
        let thumbnail = match &thumb_path {
            Some(path) => Some(self.uploaded_artifact(path).await?),
            None => None,
        };
        let display = match &display_path {
            Some(path) => Some(self.uploaded_artifact(path).await?),
            None => None,
        };

        let location = match (&self.geocoder, media.coordinates) {
            (Some(geocoder), Some(coordinates)) => geocoder
                .reverse_geocode(coordinates)
                .await
                .unwrap_or_else(|err| {
                    vault_logs::warn!("reverse geocoding failed: {err:#}");
                    None
                }),
            _ => None,
        };

        let record = build_record(task, &media, location);
        let total_size = asset.length
            + thumbnail.as_ref().map_or(0, |artifact| artifact.length)
            + display.as_ref().map_or(0, |artifact| artifact.length);
        Ok(AssetData {
            asset,
            thumbnail,
            display,
            record,
            total_size,
        })
    }

    async fn uploaded_artifact(&self, path: &str) -> anyhow::Result<UploadedArtifact> {
        let info = self
            .store
            .info(path)
            .await?
            .with_context(|| format!("uploaded artifact `{path}` vanished"))?;
        let stream = self.store.read_stream(path).await?;
        let hash = hash_async_reader(stream)
            .await
            .with_context(|| format!("failed re-hashing `{path}`"))?;
        Ok(UploadedArtifact {
            path: path.to_string(),
            hash,
            length: info.length,
            last_modified: info.last_modified,
        })
    }

    async fn cleanup(&self, uploaded: &[String]) {
        for path in uploaded {
            if let Err(err) = self.store.delete_file(path).await {
                vault_logs::warn!("failed to remove partial upload `{path}`: {err}");
            }
        }
    }
}

fn build_record(task: &ImportFileTask, media: &MediaInfo, location: Option<String>) -> AssetRecord {
    let logical = task.file.logical_path.replace('\\', "/");
    let (directory, file_name) = match logical.rsplit_once('/') {
        Some((directory, file_name)) => (directory.to_string(), file_name.to_string()),
        None => (String::new(), logical.clone()),
    };
    AssetRecord {
        id: task.asset_id,
        content_type: task.file.content_type.clone(),
        hash: task.expected_hash.to_hex(),
        file_name,
        directory,
        labels: task.file.labels.clone(),
        resolution: media.resolution,
        coordinates: media.coordinates,
        location,
        photo_date: media.photo_date,
        upload_date: millis_since_epoch(),
        duration: media.duration,
        description: String::new(),
        micro_preview: media.micro_preview_base64.clone(),
        color: media.dominant_color,
        properties: bson::Document::new(),
    }
}

#[async_trait]
impl TaskHandler for ImportFileHandler {
    type Task = ImportFileTask;
    type Output = AssetData;

    const SERVICE_NAME: &'static str = "import-file";

    async fn handle(&self, task: ImportFileTask) -> anyhow::Result<AssetData> {
        let mut uploaded = Vec::new();
        match self.import(&task, &mut uploaded).await {
            Ok(asset_data) => Ok(asset_data),
            Err(err) => {
                self.cleanup(&uploaded).await;
                Err(err)
            }
        }
    }
}
