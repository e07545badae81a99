use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::Serialize;

const DOCKERHUB_HOSTS: [&str; 3] = ["docker.io", "index.docker.io", "registry-1.docker.io"];
const DOCKERHUB_REGISTRY: &str = "registry-1.docker.io";
const GHCR_HOST: &str = "ghcr.io";
const MCR_HOST: &str = "mcr.microsoft.com";
const DEFAULT_TAG: &str = "latest";

/// Parsing related errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Image name is empty.")]
    EmptyImage,
    #[error("Image `{0}` has no repository.")]
    EmptyRepository(String),
}

/// The registry an image lives in, which decides how tokens are obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registry {
    DockerHub,
    GitHub,
    Mcr,
    Other(String),
}

impl Registry {
    /// The host the registry API is served from.
    pub fn host(&self) -> &str {
        match self {
            Self::DockerHub => DOCKERHUB_REGISTRY,
            Self::GitHub => GHCR_HOST,
            Self::Mcr => MCR_HOST,
            Self::Other(host) => host,
        }
    }

    /// Base url without scheme, e.g. `ghcr.io/v2/`.
    pub fn base_url(&self) -> String {
        format!("{}/v2/", self.host())
    }

    fn from_host(host: &str) -> Self {
        let host = host.to_ascii_lowercase();
        if DOCKERHUB_HOSTS.contains(&host.as_str()) {
            Self::DockerHub
        } else if host == GHCR_HOST {
            Self::GitHub
        } else if host == MCR_HOST {
            Self::Mcr
        } else {
            Self::Other(host)
        }
    }
}

/// A `(repository, tag)` pair to be resolved. The tag may also be a digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReference {
    pub registry:   Registry,
    /// Path within the registry, without host, e.g. `library/alpine`.
    pub repository: String,
    pub tag:        String,
}

impl ImageReference {
    pub fn new(registry: Registry, repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            registry,
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Whether the tag is a content digest like `sha256:<hex>`.
    pub fn is_digest(&self) -> bool {
        is_digest(&self.tag)
    }
}

pub fn is_digest(reference: &str) -> bool {
    reference
        .split_once(':')
        .is_some_and(|(algorithm, hex)| !algorithm.is_empty() && !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// The first path segment is a host if it looks like one.
fn is_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

impl FromStr for ImageReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyImage);
        }

        let (registry, remainder) = match trimmed.split_once('/') {
            Some((first, rest)) if is_host(first) => (Registry::from_host(first), rest),
            _ => (Registry::DockerHub, trimmed),
        };

        let (name, tag) = if let Some((name, digest)) = remainder.split_once('@') {
            // A digest wins over a tag, `name:tag@digest` is common in pinned files.
            let name = name.split_once(':').map_or(name, |(name, _)| name);
            (name, digest.to_owned())
        } else {
            match remainder.rsplit_once(':') {
                Some((name, tag)) if !tag.is_empty() => (name, tag.to_owned()),
                Some((name, _)) => (name, DEFAULT_TAG.to_owned()),
                None => (remainder, DEFAULT_TAG.to_owned()),
            }
        };

        let name = name.trim_matches('/');
        if name.is_empty() {
            return Err(ParseError::EmptyRepository(trimmed.to_owned()));
        }

        let repository = if registry == Registry::DockerHub && !name.contains('/') {
            format!("library/{name}")
        } else {
            name.to_owned()
        };

        Ok(Self::new(registry, repository, tag))
    }
}

impl Display for ImageReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_digest() {
            write!(f, "{}/{}@{}", self.registry.host(), self.repository, self.tag)
        } else {
            write!(f, "{}/{}:{}", self.registry.host(), self.repository, self.tag)
        }
    }
}

/// Metadata of one platform image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub os:           String,
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant:      Option<String>,
    /// Digest of the platform manifest, not of the config. Empty if the
    /// registry did not report it.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub digest:       String,
    pub layers:       Vec<String>,
}

impl ImageInfo {
    /// The deduplication key: `os|architecture|variant`.
    pub fn key(&self) -> String {
        platform_key(&self.os, &self.architecture, self.variant.as_deref())
    }
}

pub fn platform_key(os: &str, architecture: &str, variant: Option<&str>) -> String {
    [os, architecture, variant.unwrap_or_default()].join("|")
}

/// Resolved images keyed by `ImageInfo::key`.
pub type ImageMap = BTreeMap<String, ImageInfo>;

/// Registries often leave out the variant for arm64, which is always `v8`.
pub fn infer_variant(architecture: &str, variant: Option<&str>) -> Option<String> {
    match variant {
        Some(variant) if !variant.is_empty() => Some(variant.to_owned()),
        _ if architecture == "arm64" => Some("v8".to_owned()),
        _ => None,
    }
}
