//! Image manifest model
//!
//! Models the single-manifest format (schema version 1, fsLayers) used by
//! the registries this tool targets. The layer sequence encodes the image's
//! filesystem stacking order and must round-trip to the destination
//! unchanged; only the repository name is rewritten.

use serde::{Deserialize, Serialize};

use crate::image::digest;

/// A single filesystem layer, identified by its content-addressed digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub name: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(rename = "fsLayers")]
    pub fs_layers: Vec<FsLayer>,
    /// Opaque v1Compatibility entries, carried through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<serde_json::Value>,
}

impl ImageManifest {
    pub fn media_type() -> &'static str {
        "application/vnd.docker.distribution.manifest.v1+json"
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version != 1 {
            return Err(format!(
                "unsupported manifest schema version {}",
                self.schema_version
            ));
        }
        if self.fs_layers.is_empty() {
            return Err("manifest must contain at least one layer".to_string());
        }
        for layer in &self.fs_layers {
            if !digest::is_valid_docker_digest(&layer.blob_sum) {
                return Err(format!("invalid layer digest: {}", layer.blob_sum));
            }
        }
        Ok(())
    }

    /// Structural copy re-addressed to a different repository. The source
    /// manifest is left untouched; the tag in the body is carried as-is
    /// because the publish-time tag parameter is authoritative.
    pub fn for_repository(&self, repository: &str) -> ImageManifest {
        let mut copy = self.clone();
        copy.name = repository.to_string();
        copy
    }
}
