use serde::{Deserialize, Serialize};

use crate::error::{FreshnessError, Result};

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Default, Clone)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// One per-platform manifest listed inside an index.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Default, Clone)]
pub struct IndexEntry {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// A Docker manifest list or an OCI image index.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ManifestIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u16,

    #[serde(rename = "mediaType", default)]
    pub media_type: Option<String>,

    pub manifests: Vec<IndexEntry>,
}

impl ManifestIndex {
    pub fn parse(index_bytes: &[u8]) -> Result<ManifestIndex> {
        serde_json::from_slice(index_bytes).map_err(|e| FreshnessError::parse("manifest index", e))
    }

    /// First entry built for `architecture`. Entries without a platform never match.
    pub fn find_architecture(&self, architecture: &str) -> Option<&IndexEntry> {
        self.manifests.iter().find(|entry| {
            entry
                .platform
                .as_ref()
                .map(|p| p.architecture == architecture)
                .unwrap_or(false)
        })
    }
}
