//! End-to-end tests of the import pipeline against in-memory collaborators.

use std::{path::PathBuf, sync::Arc};

use vault_config::{DatabaseConfig, HashCacheConfig, ImportConfig, SimulatedFailure};
use vault_dal::{DocumentStore, MemoryDocumentStore};
use vault_object_store::{MockStore, ObjectStore};

use crate::{database::AssetDatabase, pipeline::ImportPipeline};

struct TestEnv {
    store: Arc<MockStore>,
    documents: Arc<MemoryDocumentStore>,
    source_dir: tempfile::TempDir,
    cache_dir: tempfile::TempDir,
}

impl TestEnv {
    async fn new() -> Self {
        let env = Self {
            store: Arc::new(MockStore::default()),
            documents: Arc::new(MemoryDocumentStore::default()),
            source_dir: tempfile::tempdir().unwrap(),
            cache_dir: tempfile::tempdir().unwrap(),
        };
        let mut database = env.database();
        database.create().await.unwrap();
        env
    }

    fn database(&self) -> AssetDatabase {
        AssetDatabase::new(
            Arc::clone(&self.store) as Arc<dyn ObjectStore>,
            self.database_config(),
        )
    }

    fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            device_id: "test-device".to_string(),
            readonly: false,
        }
    }

    fn pipeline(&self, config: ImportConfig) -> ImportPipeline {
        let cache_config = HashCacheConfig {
            file_path: self
                .cache_dir
                .path()
                .join("hash-cache-x.dat")
                .to_string_lossy()
                .into_owned(),
            read_only: false,
            save_interval: 100,
        };
        ImportPipeline::new(
            Arc::clone(&self.store) as Arc<dyn ObjectStore>,
            Arc::clone(&self.documents) as Arc<dyn DocumentStore>,
            self.database_config(),
            config,
            cache_config,
        )
    }

    fn fast_config(&self) -> ImportConfig {
        ImportConfig {
            worker_count: 2,
            throttle_interval_ms: 20,
            ..ImportConfig::default()
        }
    }

    fn write_source(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.source_dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn roots(&self) -> Vec<PathBuf> {
        vec![self.source_dir.path().to_owned()]
    }
}

#[tokio::test]
async fn pipeline_imports_files_end_to_end() {
    let env = TestEnv::new().await;
    env.write_source("one.jpg", b"first photo");
    env.write_source("two.png", b"second photo");
    env.write_source("three.mp4", b"a video");

    let summary = env.pipeline(env.fast_config()).run(&env.roots()).await.unwrap();

    assert_eq!(summary.files_processed, 3);
    assert_eq!(summary.files_added, 3);
    assert_eq!(summary.files_already_added, 0);
    assert_eq!(summary.files_deduped, 0);
    assert_eq!(summary.files_failed, 0);
    assert!(summary.total_size > 0);
    assert_eq!(
        summary.average_size,
        summary.total_size / summary.files_added
    );
    assert_eq!(env.documents.len().await, 3);

    // The committed tree tracks one asset leaf per imported file.
    let mut database = env.database();
    assert!(database.load().await.unwrap());
    let tree = database.merkle_tree().unwrap();
    assert_eq!(tree.metadata().total_files, 3);
    tree.verify_consistency().unwrap();
    assert_eq!(
        tree.database_metadata()
            .unwrap()
            .get_i64("filesImported")
            .unwrap(),
        3
    );
    for name in tree.get_active_files() {
        assert!(name.starts_with("asset/"));
        assert!(env.store.file_exists(&name).await.unwrap());
    }
}

#[tokio::test]
async fn identical_content_is_imported_once() {
    let env = TestEnv::new().await;
    env.write_source("copy-a.jpg", b"the very same bytes");
    env.write_source("copy-b.jpg", b"the very same bytes");

    let summary = env.pipeline(env.fast_config()).run(&env.roots()).await.unwrap();

    // However the two hash tasks race, exactly one asset record and one set
    // of blobs must exist; the second file shows up as either already-added
    // (committed before it hashed) or deduplicated (caught in flight).
    assert_eq!(env.documents.len().await, 1);
    assert_eq!(summary.files_added, 1);
    assert_eq!(summary.files_already_added + summary.files_deduped, 1);
    assert_eq!(summary.files_failed, 0);
    assert_eq!(
        summary.files_processed,
        summary.files_added
            + summary.files_already_added
            + summary.files_deduped
            + summary.files_failed
    );

    let mut database = env.database();
    database.load().await.unwrap();
    assert_eq!(database.merkle_tree().unwrap().metadata().total_files, 1);
}

#[tokio::test]
async fn second_run_recognizes_existing_content() {
    let env = TestEnv::new().await;
    env.write_source("photo.jpg", b"already imported once");

    let first = env.pipeline(env.fast_config()).run(&env.roots()).await.unwrap();
    assert_eq!(first.files_added, 1);

    let second = env.pipeline(env.fast_config()).run(&env.roots()).await.unwrap();
    assert_eq!(second.files_added, 0);
    assert_eq!(second.files_already_added, 1);
    // The second run answered from the hash cache written by the first.
    assert_eq!(env.documents.len().await, 1);
}

#[tokio::test]
async fn unsupported_and_hidden_files_are_ignored() {
    let env = TestEnv::new().await;
    env.write_source("good.jpg", b"photo");
    env.write_source("notes.txt", b"not media");
    env.write_source(".DS_Store.jpg", b"hidden");

    let summary = env.pipeline(env.fast_config()).run(&env.roots()).await.unwrap();
    assert_eq!(summary.files_added, 1);
    assert_eq!(summary.files_ignored, 2);
    assert_eq!(summary.files_failed, 0);
}

#[tokio::test]
async fn simulated_failures_are_counted_never_fatal() {
    let env = TestEnv::new().await;
    for i in 0..12 {
        env.write_source(&format!("photo-{i:02}.jpg"), format!("unique {i}").as_bytes());
    }
    let config = ImportConfig {
        simulate_failure: Some(SimulatedFailure::AddFile),
        ..env.fast_config()
    };

    let summary = env.pipeline(config).run(&env.roots()).await.unwrap();

    // Every accepted file is accounted for exactly once.
    assert_eq!(summary.files_processed, 12);
    assert_eq!(
        summary.files_added
            + summary.files_already_added
            + summary.files_deduped
            + summary.files_failed,
        12
    );
    assert_eq!(env.documents.len().await as u64, summary.files_added);

    // Failed imports cleaned their artifacts: every surviving asset blob is
    // referenced by a record.
    let mut database = env.database();
    database.load().await.unwrap();
    let tree = database.merkle_tree().unwrap();
    assert_eq!(u64::from(tree.metadata().total_files), summary.files_added);
    tree.verify_consistency().unwrap();
}

#[tokio::test]
async fn zip_archives_import_every_member() {
    use std::io::Write as _;

    let env = TestEnv::new().await;
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, content) in [
        ("a.jpg", &b"member one"[..]),
        ("nested/b.png", &b"member two"[..]),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    let archive = writer.finish().unwrap().into_inner();
    std::fs::write(env.source_dir.path().join("batch.zip"), archive).unwrap();

    let summary = env.pipeline(env.fast_config()).run(&env.roots()).await.unwrap();
    assert_eq!(summary.files_added, 2);
    assert_eq!(summary.files_failed, 0);

    let docs = env.documents.all().await;
    let mut file_names: Vec<_> = docs
        .iter()
        .map(|doc| doc.get_str("fileName").unwrap().to_owned())
        .collect();
    file_names.sort();
    assert_eq!(file_names, ["a.jpg", "b.png"]);
    // Directories keep the archive-qualified location.
    let b_doc = docs
        .iter()
        .find(|doc| doc.get_str("fileName").unwrap() == "b.png")
        .unwrap();
    assert!(b_doc
        .get_str("directory")
        .unwrap()
        .ends_with("batch.zip/nested"));
}

#[tokio::test]
async fn gzip_members_import_transparently() {
    use std::io::Write as _;

    let env = TestEnv::new().await;
    let archive_path = env.source_dir.path().join("shot.jpg.gz");
    let mut encoder = flate2::write::GzEncoder::new(
        std::fs::File::create(&archive_path).unwrap(),
        flate2::Compression::default(),
    );
    encoder.write_all(b"compressed photo bytes").unwrap();
    encoder.finish().unwrap();

    let summary = env.pipeline(env.fast_config()).run(&env.roots()).await.unwrap();
    assert_eq!(summary.files_added, 1);

    let docs = env.documents.all().await;
    assert_eq!(docs.len(), 1);
    // The record carries the logical (archive-qualified) name, not the temp
    // extraction path.
    let file_name = docs[0].get_str("fileName").unwrap();
    assert_eq!(file_name, "shot.jpg");
    let directory = docs[0].get_str("directory").unwrap();
    assert!(directory.ends_with("shot.jpg.gz"));
}
