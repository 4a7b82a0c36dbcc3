use serde::{Deserialize, Serialize};
use vault_basic_types::EpochMillis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Output of media analysis for one file. Every field is optional; a plain
/// binary blob yields the default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub resolution: Option<Resolution>,
    pub coordinates: Option<GpsCoordinates>,
    /// Date the photo or video was taken, from EXIF or container metadata.
    pub photo_date: Option<EpochMillis>,
    /// Video duration in seconds.
    pub duration: Option<f64>,
    /// Small preview encoded as base64, embedded into the metadata record.
    pub micro_preview_base64: Option<String>,
    pub dominant_color: Option<[u8; 3]>,
    /// Generated thumbnail content, uploaded as `thumb/{asset_id}`.
    pub thumbnail: Option<Vec<u8>>,
    /// Generated display-size rendition, uploaded as `display/{asset_id}`.
    pub display: Option<Vec<u8>>,
}
