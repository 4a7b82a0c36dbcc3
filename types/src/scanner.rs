use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use vault_basic_types::EpochMillis;

/// One accepted entry produced by the scan stage. `file_path` is always a
/// real, readable file; for archive members it points at the extracted temp
/// copy while `logical_path` preserves the original nested name.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    pub file_path: PathBuf,
    pub length: u64,
    pub last_modified: EpochMillis,
    pub content_type: String,
    pub logical_path: String,
    pub labels: Vec<String>,
}

/// Counters shared by the scanner and the pipeline driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerState {
    pub files_scanned: u64,
    pub files_ignored: u64,
    pub files_failed: u64,
}
