use serde::{Deserialize, Serialize};
use vault_basic_types::{AssetId, ContentHash, EpochMillis};

use crate::media::{GpsCoordinates, Resolution};

/// Metadata record inserted into the document store for every imported asset.
/// Field names follow the historical JSON surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    #[serde(rename = "_id")]
    pub id: AssetId,
    pub content_type: String,
    /// Hex digest of the asset content; the document store indexes this field.
    pub hash: String,
    /// Original file name, kept as a searchable label.
    pub file_name: String,
    /// Original directory, kept as a searchable label.
    pub directory: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<GpsCoordinates>,
    /// Reverse-geocoded place name, when a geocoder is wired in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_date: Option<EpochMillis>,
    pub upload_date: EpochMillis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub micro_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<[u8; 3]>,
    /// Arbitrary property bag carried through unchanged.
    #[serde(default)]
    pub properties: bson::Document,
}

impl AssetRecord {
    pub fn to_document(&self) -> bson::ser::Result<bson::Document> {
        bson::to_document(self)
    }

    pub fn from_document(doc: bson::Document) -> bson::de::Result<Self> {
        bson::from_document(doc)
    }
}

/// One artifact written to the asset store during import, in the shape the
/// Merkle tree ingests it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedArtifact {
    /// Storage-relative path, e.g. `asset/{asset_id}`.
    pub path: String,
    pub hash: ContentHash,
    pub length: u64,
    pub last_modified: EpochMillis,
}

/// Result of a completed import-file task: everything the database-update
/// stage needs to commit the asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetData {
    pub asset: UploadedArtifact,
    pub thumbnail: Option<UploadedArtifact>,
    pub display: Option<UploadedArtifact>,
    pub record: AssetRecord,
    pub total_size: u64,
}

impl AssetData {
    /// Hash the database-update stage deduplicates on; equals the main
    /// asset's content hash.
    pub fn expected_hash(&self) -> ContentHash {
        self.asset.hash
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &UploadedArtifact> {
        std::iter::once(&self.asset)
            .chain(self.thumbnail.as_ref())
            .chain(self.display.as_ref())
    }
}
