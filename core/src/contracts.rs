//! Contracts for the media-specific collaborators. The pipeline only needs
//! their named operations; concrete implementations (image decoding, EXIF,
//! reverse geocoding services) live in the host application.

use std::{fmt, path::Path};

use async_trait::async_trait;
use vault_types::{GpsCoordinates, MediaInfo};

/// Produces renditions and metadata for a media file.
#[async_trait]
pub trait MediaAnalyzer: 'static + fmt::Debug + Send + Sync {
    async fn analyze(&self, file_path: &Path, content_type: &str) -> anyhow::Result<MediaInfo>;
}

/// Resolves GPS coordinates to a place name.
#[async_trait]
pub trait Geocoder: 'static + fmt::Debug + Send + Sync {
    async fn reverse_geocode(
        &self,
        coordinates: GpsCoordinates,
    ) -> anyhow::Result<Option<String>>;
}

/// Analyzer for corpora without media handling: every file imports with no
/// renditions and no extracted metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMediaAnalyzer;

#[async_trait]
impl MediaAnalyzer for NoopMediaAnalyzer {
    async fn analyze(&self, _file_path: &Path, _content_type: &str) -> anyhow::Result<MediaInfo> {
        Ok(MediaInfo::default())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGeocoder;

#[async_trait]
impl Geocoder for NoopGeocoder {
    async fn reverse_geocode(
        &self,
        _coordinates: GpsCoordinates,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}
