//! Scan producer: walks directories, filters by content type and expands
//! archives to per-session temp files so that downstream stages always
//! receive a real, readable path. Zip archives yield every member; members
//! that are archives themselves are expanded in turn, and the logical path
//! keeps the full chain of archive names.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tempfile::TempDir;
use vault_types::{ScannedFile, ScannerState};

/// Extensions the importer accepts, with their MIME types.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("avi", "video/x-msvideo"),
    ("bmp", "image/bmp"),
    ("gif", "image/gif"),
    ("heic", "image/heic"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("mkv", "video/x-matroska"),
    ("mov", "video/quicktime"),
    ("mp4", "video/mp4"),
    ("png", "image/png"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("webm", "video/webm"),
    ("webp", "image/webp"),
];

pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, content_type)| *content_type)
}

fn extension_of(path: &Path) -> Option<String> {
    Some(path.extension()?.to_str()?.to_ascii_lowercase())
}

fn is_zip_archive(path: &Path) -> bool {
    extension_of(path).as_deref() == Some("zip")
}

fn is_gzip_member(path: &Path) -> bool {
    extension_of(path).as_deref() == Some("gz")
}

/// Stateful walker for one import session. Extracted archive members live in
/// a session temp directory that is removed when the scanner drops.
#[derive(Debug)]
pub struct Scanner {
    session_dir: TempDir,
    extracted_count: usize,
    pub state: ScannerState,
}

impl Scanner {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            session_dir: TempDir::new().context("failed to create session temp directory")?,
            extracted_count: 0,
            state: ScannerState::default(),
        })
    }

    /// Walks every root, calling `emit` for each accepted file. Directories
    /// are visited in name order so that scans are deterministic. Unreadable
    /// entries are counted and skipped, never fatal.
    pub async fn scan(
        &mut self,
        roots: &[PathBuf],
        emit: &mut dyn FnMut(ScannedFile),
    ) -> anyhow::Result<()> {
        // Each pending entry pairs the on-disk path with its logical name;
        // the two differ only for extracted archive members.
        let mut pending: Vec<(PathBuf, String)> = roots
            .iter()
            .map(|path| (path.clone(), path.to_string_lossy().into_owned()))
            .collect();
        while let Some((path, logical_path)) = pending.pop() {
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    vault_logs::warn!("cannot stat {}: {err}", path.display());
                    self.state.files_failed += 1;
                    continue;
                }
            };
            if metadata.is_dir() {
                match read_dir_sorted(&path).await {
                    Ok(mut entries) => {
                        // Reverse so the stack pops in name order.
                        entries.reverse();
                        pending.extend(entries.into_iter().map(|entry| {
                            let logical = entry.to_string_lossy().into_owned();
                            (entry, logical)
                        }));
                    }
                    Err(err) => {
                        vault_logs::warn!("cannot list {}: {err}", path.display());
                        self.state.files_failed += 1;
                    }
                }
                continue;
            }
            self.scan_file(
                path,
                logical_path,
                metadata.len(),
                modified_millis(&metadata),
                emit,
                &mut pending,
            )
            .await;
        }
        Ok(())
    }

    async fn scan_file(
        &mut self,
        path: PathBuf,
        logical_path: String,
        length: u64,
        last_modified: u64,
        emit: &mut dyn FnMut(ScannedFile),
        pending: &mut Vec<(PathBuf, String)>,
    ) {
        // Hidden-file and content-type checks go by the logical leaf name;
        // extraction temp names carry a uniquifying prefix.
        let leaf_name = logical_path
            .rsplit('/')
            .next()
            .unwrap_or(logical_path.as_str())
            .to_owned();
        if leaf_name.starts_with('.') {
            self.state.files_ignored += 1;
            return;
        }

        if is_zip_archive(&path) {
            match self.expand_zip(&path).await {
                Ok(members) => {
                    // Reverse so the stack pops members in archive order;
                    // members that are archives themselves get expanded when
                    // they come back around.
                    for (extracted, member_name) in members.into_iter().rev() {
                        pending.push((extracted, format!("{logical_path}/{member_name}")));
                    }
                }
                Err(err) => {
                    vault_logs::warn!("failed to expand {}: {err:#}", path.display());
                    self.state.files_failed += 1;
                }
            }
            return;
        }
        if is_gzip_member(&path) {
            match self.expand_gzip(&path).await {
                Ok((extracted, inner_name)) => {
                    pending.push((extracted, format!("{logical_path}/{inner_name}")));
                }
                Err(err) => {
                    vault_logs::warn!("failed to expand {}: {err:#}", path.display());
                    self.state.files_failed += 1;
                }
            }
            return;
        }

        let Some(content_type) = content_type_for(Path::new(&leaf_name)) else {
            self.state.files_ignored += 1;
            return;
        };
        self.state.files_scanned += 1;
        emit(ScannedFile {
            file_path: path,
            length,
            last_modified,
            content_type: content_type.to_owned(),
            logical_path,
            labels: Vec::new(),
        });
    }

    /// Extracts every file member of a zip archive into the session
    /// directory, returning `(extracted path, member name)` pairs in archive
    /// order.
    async fn expand_zip(&mut self, path: &Path) -> anyhow::Result<Vec<(PathBuf, String)>> {
        let source = path.to_owned();
        let session_dir = self.session_dir.path().to_owned();
        let base_index = self.extracted_count;
        let members = tokio::task::spawn_blocking(
            move || -> anyhow::Result<Vec<(PathBuf, String)>> {
                let file = std::fs::File::open(&source)?;
                let mut archive =
                    zip::ZipArchive::new(file).context("not a readable zip archive")?;
                let mut members = Vec::new();
                for index in 0..archive.len() {
                    let mut entry = archive.by_index(index)?;
                    if entry.is_dir() {
                        continue;
                    }
                    let member_name = entry
                        .enclosed_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .with_context(|| {
                            format!("member `{}` has an unsafe path", entry.name())
                        })?;
                    let flat_name = member_name.replace(['/', '\\'], "_");
                    let target = session_dir
                        .join(format!("{:06}-{flat_name}", base_index + members.len() + 1));
                    let mut output = std::fs::File::create(&target)?;
                    std::io::copy(&mut entry, &mut output)?;
                    members.push((target, member_name));
                }
                Ok(members)
            },
        )
        .await
        .context("archive expansion task failed")??;
        self.extracted_count += members.len();
        Ok(members)
    }

    /// Decompresses one gzip member into the session directory.
    async fn expand_gzip(&mut self, path: &Path) -> anyhow::Result<(PathBuf, String)> {
        let inner_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .context("archive member has no inner name")?;
        self.extracted_count += 1;
        let target = self
            .session_dir
            .path()
            .join(format!("{:06}-{inner_name}", self.extracted_count));
        let source = path.to_owned();
        let destination = target.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let file = std::fs::File::open(&source)?;
            let mut decoder = flate2::read::GzDecoder::new(std::io::BufReader::new(file));
            let mut output = std::fs::File::create(&destination)?;
            std::io::copy(&mut decoder, &mut output)?;
            Ok(())
        })
        .await
        .context("archive expansion task failed")??;
        Ok((target, inner_name))
    }
}

async fn read_dir_sorted(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(path).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort_unstable();
    Ok(paths)
}

fn modified_millis(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |duration| duration.as_millis() as u64)
}
