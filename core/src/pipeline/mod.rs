//! The import pipeline: scan → hash → import → throttled database update.
//!
//! Workers hash and upload in parallel; this driver is the only owner of the
//! writable hash cache, the in-flight hash set and the pending-update queue,
//! so none of that state needs a lock. Batches of completed imports are
//! applied to the Merkle tree under the cooperative write lock, paced by a
//! trailing-edge throttle.

mod scanner;
mod stages;

pub use scanner::{content_type_for, Scanner};
pub use stages::{
    HashFileHandler, HashFileOutput, HashFileTask, ImportFileHandler, ImportFileTask,
};

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context as _;
use tokio::time::sleep;
use vault_basic_types::{AssetId, ContentHash, Uuid};
use vault_config::{DatabaseConfig, HashCacheConfig, ImportConfig};
use vault_dal::DocumentStore;
use vault_hash_cache::{HashCache, HashCacheEntry};
use vault_merkle_tree::FileEntry;
use vault_object_store::ObjectStore;
use vault_task_queue::{TaskQueue, TaskResult};
use vault_types::{AssetData, ImportSummary, UploadedArtifact};

use crate::{
    contracts::{Geocoder, MediaAnalyzer, NoopMediaAnalyzer},
    database::AssetDatabase,
    throttle::Throttle,
    write_lock::WriteLock,
};

/// The lock holder extends its claim after this many applied items.
const LOCK_REFRESH_INTERVAL: usize = 25;
/// Attempts for the final cache save at shutdown.
const CACHE_SAVE_ATTEMPTS: usize = 3;

#[derive(Debug)]
pub struct ImportPipeline {
    store: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
    database_config: DatabaseConfig,
    config: ImportConfig,
    cache_config: HashCacheConfig,
    analyzer: Arc<dyn MediaAnalyzer>,
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl ImportPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        database_config: DatabaseConfig,
        config: ImportConfig,
        cache_config: HashCacheConfig,
    ) -> Self {
        Self {
            store,
            documents,
            database_config,
            config,
            cache_config,
            analyzer: Arc::new(NoopMediaAnalyzer),
            geocoder: None,
        }
    }

    pub fn with_media_analyzer(mut self, analyzer: Arc<dyn MediaAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Imports every accepted file under `roots` into an existing asset
    /// database. Individual file failures are counted, never fatal; the
    /// returned summary is the user-visible outcome of the run.
    pub async fn run(self, roots: &[PathBuf]) -> anyhow::Result<ImportSummary> {
        let session_id = Uuid::new_v4().to_string();
        let mut summary = ImportSummary::default();
        let mut cache = HashCache::load(&self.cache_config.file_path, false)
            .context("failed loading the hash cache")?;
        let lock = WriteLock::new(Arc::clone(&self.store));
        let mut database =
            AssetDatabase::new(Arc::clone(&self.store), self.database_config.clone());

        let mut hash_queue = TaskQueue::new(
            Arc::new(HashFileHandler::new(
                PathBuf::from(&self.cache_config.file_path),
                Arc::clone(&self.documents),
            )),
            self.config.worker_count,
        );
        let mut import_queue = TaskQueue::new(
            Arc::new(ImportFileHandler::new(
                Arc::clone(&self.store),
                Arc::clone(&self.analyzer),
                self.geocoder.clone(),
                self.config.simulate_failure,
            )),
            self.config.worker_count,
        );

        // Stage 1: the scan producer feeds the hash-file queue directly.
        let mut scanner = Scanner::new()?;
        let mut outstanding_hash = 0_usize;
        {
            let queue = &hash_queue;
            let counter = &mut outstanding_hash;
            scanner
                .scan(roots, &mut |file| {
                    let task = HashFileTask {
                        asset_id: AssetId::generate(),
                        file,
                    };
                    match queue.submit(task) {
                        Ok(()) => *counter += 1,
                        Err(err) => vault_logs::error!("failed to submit hash task: {err}"),
                    }
                })
                .await?;
        }
        summary.files_ignored = scanner.state.files_ignored;
        summary.files_failed += scanner.state.files_failed;
        vault_logs::info!(
            "scan finished: {} accepted, {} ignored, {} failed",
            scanner.state.files_scanned,
            scanner.state.files_ignored,
            scanner.state.files_failed
        );

        // Stages 3-6: the driver loop.
        let mut outstanding_import = 0_usize;
        let mut hashes_queued_for_import: HashSet<ContentHash> = HashSet::new();
        let mut pending_updates: Vec<AssetData> = Vec::new();
        let mut throttle = Throttle::new(Duration::from_millis(self.config.throttle_interval_ms));
        let mut is_processing_queue = false;
        let mut new_cache_entries = 0_usize;
        let mut flush_failures = 0_usize;
        let cache_save_interval = self.cache_config.save_interval.max(1);

        while outstanding_hash > 0 || outstanding_import > 0 || throttle.is_pending() {
            tokio::select! {
                // Deterministic arm order: pending completions are handled
                // before a flush may clear the in-flight hash set, otherwise
                // a slow-to-arrive duplicate could sneak past deduplication.
                biased;
                Some(completion) = hash_queue.next_completion(), if outstanding_hash > 0 => {
                    outstanding_hash -= 1;
                    summary.files_processed += 1;
                    match completion.result {
                        TaskResult::Failed { .. } => summary.files_failed += 1,
                        TaskResult::Succeeded(output) => {
                            if !output.from_cache {
                                cache.add_hash(
                                    &stages::cache_key(&completion.task.file),
                                    HashCacheEntry {
                                        hash: output.hash,
                                        length: completion.task.file.length,
                                        last_modified: completion.task.file.last_modified,
                                    },
                                );
                                new_cache_entries += 1;
                                if new_cache_entries % cache_save_interval == 0 {
                                    // A failed interim save just leaves the
                                    // cache dirty for the next one.
                                    if let Err(err) = cache.save() {
                                        vault_logs::warn!("interim cache save failed: {err}");
                                    }
                                }
                            }
                            if output.already_in_database {
                                summary.files_already_added += 1;
                            } else if hashes_queued_for_import.contains(&output.hash) {
                                summary.files_deduped += 1;
                                vault_logs::debug!(
                                    "{} duplicates content already queued for import",
                                    completion.task.file.logical_path
                                );
                            } else {
                                hashes_queued_for_import.insert(output.hash);
                                let task = ImportFileTask {
                                    asset_id: completion.task.asset_id,
                                    file: completion.task.file,
                                    expected_hash: output.hash,
                                };
                                match import_queue.submit(task) {
                                    Ok(()) => outstanding_import += 1,
                                    Err(err) => {
                                        vault_logs::error!("failed to submit import task: {err}");
                                        summary.files_failed += 1;
                                    }
                                }
                            }
                        }
                    }
                }
                Some(completion) = import_queue.next_completion(), if outstanding_import > 0 => {
                    outstanding_import -= 1;
                    match completion.result {
                        TaskResult::Failed { .. } => {
                            summary.files_failed += 1;
                            hashes_queued_for_import.remove(&completion.task.expected_hash);
                        }
                        TaskResult::Succeeded(asset_data) => {
                            pending_updates.push(asset_data);
                            throttle.trigger();
                        }
                    }
                }
                () = throttle.fired() => {
                    if is_processing_queue || pending_updates.is_empty() {
                        continue;
                    }
                    is_processing_queue = true;
                    let batch = std::mem::take(&mut pending_updates);
                    let requeued = process_pending_database_updates(
                        &mut database,
                        &self.documents,
                        &lock,
                        &session_id,
                        1,
                        batch,
                        &mut summary,
                        &mut hashes_queued_for_import,
                    )
                    .await;
                    is_processing_queue = false;
                    if !requeued.is_empty() {
                        flush_failures += 1;
                        // Put the contended batch back at the head so commit
                        // order is preserved.
                        pending_updates.splice(0..0, requeued);
                        if flush_failures < self.config.lock_max_attempts {
                            throttle.trigger();
                        } else {
                            vault_logs::warn!(
                                "write lock contended {flush_failures} times; \
                                 deferring the batch to shutdown"
                            );
                        }
                    } else {
                        flush_failures = 0;
                    }
                }
            }
        }

        // Stage 7: shutdown. Workers are idle by now; drain the residue.
        hash_queue.await_all_tasks().await;
        import_queue.await_all_tasks().await;
        throttle.flush();
        throttle.cancel();
        // The driver is the only flusher, so no flush can still be running.
        debug_assert!(!is_processing_queue);
        if !pending_updates.is_empty() {
            let batch = std::mem::take(&mut pending_updates);
            let batch_len = batch.len();
            let requeued = process_pending_database_updates(
                &mut database,
                &self.documents,
                &lock,
                &session_id,
                self.config.lock_max_attempts,
                batch,
                &mut summary,
                &mut hashes_queued_for_import,
            )
            .await;
            if !requeued.is_empty() {
                vault_logs::error!(
                    "{} imported files could not be committed: the write lock \
                     stayed contended",
                    requeued.len()
                );
                summary.files_failed += batch_len as u64;
            }
        }

        for attempt in 1..=CACHE_SAVE_ATTEMPTS {
            match cache.save() {
                Ok(()) => break,
                Err(err) if attempt < CACHE_SAVE_ATTEMPTS => {
                    vault_logs::warn!("final cache save attempt {attempt} failed: {err}");
                    sleep(Duration::from_millis(500)).await;
                }
                Err(err) => vault_logs::error!("giving up on saving the hash cache: {err}"),
            }
        }

        summary.finalize_average();
        hash_queue.shutdown().await;
        import_queue.shutdown().await;
        vault_logs::info!(
            "import finished: {} added, {} already present, {} deduplicated, \
             {} ignored, {} failed",
            summary.files_added,
            summary.files_already_added,
            summary.files_deduped,
            summary.files_ignored,
            summary.files_failed
        );
        Ok(summary)
    }
}

/// Applies one batch under the write lock. Returns the items to re-queue:
/// the whole batch when the lock is contended, nothing otherwise. Apply
/// errors after the lock was taken count the batch as failed rather than
/// aborting the pipeline.
#[allow(clippy::too_many_arguments)]
async fn process_pending_database_updates(
    database: &mut AssetDatabase,
    documents: &Arc<dyn DocumentStore>,
    lock: &WriteLock,
    session_id: &str,
    lock_attempts: usize,
    batch: Vec<AssetData>,
    summary: &mut ImportSummary,
    hashes_queued_for_import: &mut HashSet<ContentHash>,
) -> Vec<AssetData> {
    let acquired = match lock.acquire(session_id, lock_attempts).await {
        Ok(acquired) => acquired,
        Err(err) => {
            vault_logs::warn!("write lock acquisition errored: {err:#}");
            false
        }
    };
    if !acquired {
        return batch;
    }

    let result = apply_batch(database, documents, lock, session_id, &batch).await;
    lock.release().await;

    match result {
        Ok(()) => {
            // The batch is durable only now; account for it as a whole.
            summary.files_added += batch.len() as u64;
            summary.total_size += batch.iter().map(|item| item.total_size).sum::<u64>();
            for item in &batch {
                hashes_queued_for_import.remove(&item.expected_hash());
            }
            Vec::new()
        }
        Err(err) => {
            vault_logs::error!("failed applying a database update batch: {err:#}");
            summary.files_failed += batch.len() as u64;
            for item in &batch {
                hashes_queued_for_import.remove(&item.expected_hash());
            }
            Vec::new()
        }
    }
}

async fn apply_batch(
    database: &mut AssetDatabase,
    documents: &Arc<dyn DocumentStore>,
    lock: &WriteLock,
    session_id: &str,
    batch: &[AssetData],
) -> anyhow::Result<()> {
    // Every committer reloads the tree: another writer may have advanced it
    // since the last batch.
    anyhow::ensure!(
        database.load().await?,
        "asset database not found; create it before importing"
    );

    for (index, item) in batch.iter().enumerate() {
        for artifact in item.artifacts() {
            database.upsert_file(artifact_entry(artifact))?;
        }
        documents
            .insert_one(item.record.to_document().context("failed encoding the asset record")?)
            .await
            .context("failed inserting the asset record")?;
        if (index + 1) % LOCK_REFRESH_INTERVAL == 0 {
            lock.refresh(session_id).await.ok();
        }
    }

    let tree = database.merkle_tree_mut()?;
    let mut metadata = tree.database_metadata().cloned().unwrap_or_default();
    let imported = metadata.get_i64("filesImported").unwrap_or(0);
    metadata.insert("filesImported", imported + batch.len() as i64);
    tree.set_database_metadata(Some(metadata));

    database.save().await
}

fn artifact_entry(artifact: &UploadedArtifact) -> FileEntry {
    FileEntry {
        name: artifact.path.clone(),
        hash: artifact.hash,
        length: artifact.length,
        last_modified: artifact.last_modified,
    }
}
