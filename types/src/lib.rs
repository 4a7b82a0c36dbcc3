//! Data model shared by the import pipeline, the asset database facade and
//! the metadata store.

pub mod asset;
pub mod media;
pub mod scanner;
pub mod summary;

pub use asset::{AssetData, AssetRecord, UploadedArtifact};
pub use media::{GpsCoordinates, MediaInfo, Resolution};
pub use scanner::{ScannedFile, ScannerState};
pub use summary::ImportSummary;
