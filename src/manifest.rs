use serde::Deserialize;
use serde_json::Value;

pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_CONTAINER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";

/// `Accept` types for the manifest behind a tag. The registry picks whichever
/// representation it prefers.
pub const ACCEPT_ANY_MANIFEST: &[&str] = &[DOCKER_MANIFEST_LIST, OCI_IMAGE_INDEX, DOCKER_MANIFEST, OCI_IMAGE_MANIFEST];
/// `Accept` types for a single platform manifest addressed by digest.
pub const ACCEPT_IMAGE_MANIFEST: &[&str] = &[DOCKER_MANIFEST, OCI_IMAGE_MANIFEST];
/// `Accept` types for a config blob.
pub const ACCEPT_IMAGE_CONFIG: &[&str] = &[DOCKER_CONTAINER_CONFIG, OCI_IMAGE_CONFIG];

/// A multi platform manifest list.
#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    pub media_type:     String,
    pub manifests:      Vec<ManifestDescriptor>,
}

/// A reference from an index to one platform manifest.
#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDescriptor {
    pub media_type: String,
    pub digest:     String,
    pub size:       u64,
    /// Artifact entries (attestations, signatures) may come without a platform.
    #[serde(default)]
    pub platform:   Option<Platform>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os:           String,
    #[serde(default)]
    pub variant:      Option<String>,
}

/// The manifest of a single platform image.
#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    pub media_type:     String,
    pub config:         Descriptor,
    pub layers:         Vec<Descriptor>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub size:       u64,
    pub digest:     String,
}

/// The parts of an image config blob we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    pub architecture: String,
    pub os:           String,
    #[serde(default)]
    pub variant:      Option<String>,
    pub rootfs:       RootFs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootFs {
    pub diff_ids: Vec<String>,
}

/// The schema a parsed registry response satisfies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Index,
    Manifest,
    Config,
    Unknown,
}

impl Kind {
    /// Classifies by body shape only, the `Content-Type` header is not
    /// trustworthy across registries.
    pub fn of(value: &Value) -> Self {
        if is_image_index(value) {
            Self::Index
        } else if is_image_manifest(value) {
            Self::Manifest
        } else if is_image_config(value) {
            Self::Config
        } else {
            Self::Unknown
        }
    }
}

fn media_type(value: &Value) -> Option<&str> {
    value.as_object()?.get("mediaType")?.as_str()
}

/// True for OCI image indexes and Docker manifest lists. The `manifests`
/// array is not inspected.
pub fn is_image_index(value: &Value) -> bool {
    matches!(media_type(value), Some(OCI_IMAGE_INDEX | DOCKER_MANIFEST_LIST))
}

/// True for OCI image manifests and Docker v2 manifests.
pub fn is_image_manifest(value: &Value) -> bool {
    matches!(media_type(value), Some(OCI_IMAGE_MANIFEST | DOCKER_MANIFEST))
}

/// Config blobs carry no `mediaType`, so this checks structure: string
/// `architecture` and `os`, and `rootfs.diff_ids` holding only strings.
pub fn is_image_config(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    let has_architecture = object.get("architecture").is_some_and(Value::is_string);
    let has_os = object.get("os").is_some_and(Value::is_string);
    let has_rootfs = object
        .get("rootfs")
        .and_then(Value::as_object)
        .and_then(|rootfs| rootfs.get("diff_ids"))
        .and_then(Value::as_array)
        .is_some_and(|diff_ids| diff_ids.iter().all(Value::is_string));

    has_architecture && has_os && has_rootfs
}
