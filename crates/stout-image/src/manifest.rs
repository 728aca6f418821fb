//! Manifest and index documents.

use serde::Deserialize;
use stout_common::{StoutError, StoutResult};

use crate::digest::Digest;

/// Docker manifest list v2 media type.
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image index v1 media type.
pub const OCI_IMAGE_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";
/// Docker image manifest v2 schema 2 media type.
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// OCI image manifest v1 media type.
pub const OCI_IMAGE_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";

/// The `Accept` header sent with every registry request.
pub const ACCEPT_HEADER: &str = "application/vnd.docker.distribution.manifest.list.v2+json, \
                                 application/vnd.oci.image.manifest.v1+json";

/// Platform fields of an index entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Platform {
    /// OCI architecture name (e.g. `amd64`).
    pub architecture: String,
    /// Operating system (e.g. `linux`).
    pub os: String,
}

/// One per-platform manifest listed in an index.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
    /// Digest of the concrete manifest.
    pub digest: Digest,
    /// Media type of the concrete manifest.
    #[serde(rename = "mediaType")]
    pub media_type: String,
    /// Size of the concrete manifest in bytes.
    #[serde(default)]
    pub size: u64,
    /// Target platform; attestation entries omit it.
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// A manifest list / image index.
#[derive(Debug, Deserialize)]
pub struct ManifestIndex {
    /// Ordered per-platform entries.
    pub manifests: Vec<IndexEntry>,
}

impl ManifestIndex {
    /// Select the first entry matching the given platform, in index order.
    pub fn select(&self, os: &str, architecture: &str) -> StoutResult<&IndexEntry> {
        self.manifests
            .iter()
            .find(|entry| {
                entry
                    .platform
                    .as_ref()
                    .is_some_and(|p| p.os == os && p.architecture == architecture)
            })
            .ok_or_else(|| StoutError::NoPlatformMatch {
                os: os.to_string(),
                architecture: architecture.to_string(),
            })
    }
}

/// A content descriptor: digest, media type and size.
///
/// Used both for the config blob and for layers; layer order in a manifest
/// is the order they are applied to the root filesystem.
#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    /// Media type of the blob.
    #[serde(rename = "mediaType")]
    pub media_type: String,
    /// Content digest.
    pub digest: Digest,
    /// Blob size in bytes.
    pub size: u64,
}

/// A concrete image manifest (Docker v2 schema 2 or OCI v1).
///
/// Both flavors carry the same `config`/`layers` shape and are treated
/// identically.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    /// Media type of the manifest itself.
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    /// Config blob descriptor.
    pub config: Descriptor,
    /// Ordered layer descriptors.
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// Reject manifests whose media type this runtime does not consume.
    pub fn ensure_supported(&self) -> StoutResult<()> {
        match self.media_type.as_str() {
            DOCKER_MANIFEST_V2 | OCI_IMAGE_MANIFEST_V1 => Ok(()),
            other => Err(StoutError::UnsupportedMediaType {
                media_type: other.to_string(),
            }),
        }
    }
}

/// Host platform in OCI naming: `(os, architecture)`.
#[must_use]
pub fn host_platform() -> (&'static str, &'static str) {
    (std::env::consts::OS, host_arch())
}

/// Map `std::env::consts::ARCH` to OCI architecture names.
fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        "riscv64" => "riscv64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST_A: &str =
        "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const DIGEST_B: &str =
        "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn sample_index() -> ManifestIndex {
        serde_json::from_value(serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_LIST_V2,
            "manifests": [
                {
                    "digest": DIGEST_A,
                    "mediaType": DOCKER_MANIFEST_V2,
                    "size": 428,
                    "platform": { "architecture": "arm64", "os": "linux" }
                },
                {
                    "digest": DIGEST_B,
                    "mediaType": DOCKER_MANIFEST_V2,
                    "size": 428,
                    "platform": { "architecture": "amd64", "os": "linux" }
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn select_matches_os_and_arch() {
        let index = sample_index();
        let entry = index.select("linux", "amd64").unwrap();
        assert_eq!(entry.digest.as_str(), DIGEST_B);
    }

    #[test]
    fn select_first_match_wins() {
        let index = sample_index();
        let entry = index.select("linux", "arm64").unwrap();
        assert_eq!(entry.digest.as_str(), DIGEST_A);
    }

    #[test]
    fn select_no_match() {
        let index = sample_index();
        assert!(matches!(
            index.select("windows", "amd64"),
            Err(StoutError::NoPlatformMatch { .. })
        ));
    }

    #[test]
    fn manifest_parses_layers_in_order() {
        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_V2,
            "config": { "mediaType": "application/vnd.docker.container.image.v1+json",
                        "digest": DIGEST_A, "size": 1 },
            "layers": [
                { "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                  "digest": DIGEST_A, "size": 2 },
                { "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                  "digest": DIGEST_B, "size": 3 }
            ]
        }))
        .unwrap();

        manifest.ensure_supported().unwrap();
        assert_eq!(manifest.layers.len(), 2);
        assert_eq!(manifest.layers[0].digest.as_str(), DIGEST_A);
        assert_eq!(manifest.layers[1].digest.as_str(), DIGEST_B);
    }

    #[test]
    fn manifest_rejects_foreign_media_type() {
        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "mediaType": "application/vnd.docker.plugin.v1+json",
            "config": { "mediaType": "c", "digest": DIGEST_A, "size": 1 },
            "layers": []
        }))
        .unwrap();

        assert!(matches!(
            manifest.ensure_supported(),
            Err(StoutError::UnsupportedMediaType { .. })
        ));
    }

    #[test]
    fn manifest_rejects_malformed_digest() {
        let result: Result<Manifest, _> = serde_json::from_value(serde_json::json!({
            "mediaType": DOCKER_MANIFEST_V2,
            "config": { "mediaType": "c", "digest": "sha256:nothex", "size": 1 },
            "layers": []
        }));
        assert!(result.is_err());
    }

    #[test]
    fn host_platform_is_oci_named() {
        let (_, arch) = host_platform();
        assert!(!arch.contains('_'), "expected OCI arch name, got {arch}");
    }
}
