pub mod index;
pub mod manifest;

use serde::{Deserialize, Serialize};

pub use index::{IndexEntry, ManifestIndex, Platform};
pub use manifest::Manifest;

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

/// Everything we are prepared to accept when resolving a reference.
pub const MANIFEST_ACCEPT: [&str; 4] = [
    DOCKER_MANIFEST_V2,
    DOCKER_MANIFEST_LIST_V2,
    OCI_MANIFEST_V1,
    OCI_INDEX_V1,
];

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum MediaKind {
    Manifest,
    Index,
    Other,
}

impl MediaKind {
    pub fn from_media_type(media_type: &str) -> MediaKind {
        // Registries may append parameters, e.g. `; charset=utf-8`.
        let essence = media_type.split(';').next().unwrap_or("").trim();
        match essence {
            DOCKER_MANIFEST_V2 | OCI_MANIFEST_V1 => MediaKind::Manifest,
            DOCKER_MANIFEST_LIST_V2 | OCI_INDEX_V1 => MediaKind::Index,
            _ => MediaKind::Other,
        }
    }
}

/// A fetchable registry object: a manifest, an index, or a blob.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Default, Clone)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

impl Descriptor {
    pub fn kind(&self) -> MediaKind {
        MediaKind::from_media_type(&self.media_type)
    }
}
