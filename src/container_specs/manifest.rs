use serde::{Deserialize, Serialize};

use super::Descriptor;
use crate::error::{FreshnessError, Result};

/// A single-platform image manifest. Only the config reference matters to us.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u16,

    #[serde(rename = "mediaType", default)]
    pub media_type: Option<String>,

    pub config: Descriptor,

    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    pub fn parse(manifest_bytes: &[u8]) -> Result<Manifest> {
        serde_json::from_slice(manifest_bytes).map_err(|e| FreshnessError::parse("image manifest", e))
    }

    pub fn config_digest(&self) -> &str {
        &self.config.digest
    }
}
