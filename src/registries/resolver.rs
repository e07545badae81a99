use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::image::{ImageInfo, ImageMap, ImageReference, infer_variant};
use crate::manifest::{
    ACCEPT_ANY_MANIFEST, ACCEPT_IMAGE_CONFIG, ACCEPT_IMAGE_MANIFEST, ImageConfig, ImageIndex, ImageManifest, Kind, ManifestDescriptor,
    is_image_config, is_image_manifest,
};
use crate::registries::{Error, TokenProvider};
use crate::transport::{FetchResult, Transport};

const UNKNOWN_ARCHITECTURE: &str = "unknown";

/// Which digests end up in `ImageInfo::layers`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LayerSource {
    /// Compressed layer digests from the platform manifest. Platform identity
    /// comes from the index descriptors, no config blob is fetched for them.
    #[default]
    Compressed,
    /// Uncompressed `diff_ids` from the config blob. Costs one more request per
    /// platform.
    Uncompressed,
}

/// Resolves image references against one registry.
pub struct ContainerRegistry<T> {
    /// Host and api prefix without scheme, e.g. `ghcr.io/v2/`.
    base_url:     String,
    transport:    T,
    provider:     Box<dyn TokenProvider>,
    layer_source: LayerSource,
}

/// Per call state: the repository and the token used for every request.
struct Session<'a> {
    repository:    &'a str,
    authorization: Option<String>,
}

impl Session<'_> {
    fn headers<'h>(&'h self, accept: &'h str) -> Vec<(&'h str, &'h str)> {
        let mut headers = vec![("Accept", accept)];
        if let Some(authorization) = &self.authorization {
            headers.push(("Authorization", authorization.as_str()));
        }
        headers
    }
}

impl<T: Transport> ContainerRegistry<T> {
    pub fn new(base_url: impl Into<String>, transport: T, provider: Box<dyn TokenProvider>) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
            provider,
            layer_source: LayerSource::default(),
        }
    }

    #[must_use]
    pub const fn with_layer_source(mut self, layer_source: LayerSource) -> Self {
        self.layer_source = layer_source;
        self
    }

    fn manifest_url(&self, repository: &str, reference: &str) -> String {
        format!("https://{}{repository}/manifests/{reference}", self.base_url)
    }

    fn blob_url(&self, repository: &str, digest: &str) -> String {
        format!("https://{}{repository}/blobs/{digest}", self.base_url)
    }

    fn fetch(&self, session: &Session<'_>, url: &str, accept: &[&str]) -> Result<FetchResult, Error> {
        let accept = accept.join(",");
        Ok(self.transport.fetch_json(url, &session.headers(&accept))?)
    }

    /// Resolves `image` into one `ImageInfo` per platform.
    ///
    /// # Errors
    ///
    /// The first error aborts the whole resolution, see `Error`.
    pub fn get_image_info(&self, image: &ImageReference) -> Result<ImageMap, Error> {
        debug!("Fetching token for repository: {} ({:?} layers)", image.repository, self.layer_source);
        let token = self.provider.get_token(&image.repository)?;
        let session = Session {
            repository:    &image.repository,
            authorization: (!token.is_empty()).then(|| format!("Bearer {token}")),
        };

        let url = self.manifest_url(&image.repository, &image.tag);
        debug!("Fetching manifest for image: {}:{}", image.repository, image.tag);
        let result = self.fetch(&session, &url, ACCEPT_ANY_MANIFEST)?;

        let content_type = result.header("content-type").map(str::to_owned);
        let content_digest = match result.header("docker-content-digest") {
            Some(digest) => digest.to_owned(),
            None if image.is_digest() => image.tag.clone(),
            None => {
                warn!("{url} did not send a docker-content-digest header.");
                String::new()
            }
        };
        debug!("Content type: {content_type:?}");
        debug!("Docker content digest: {content_digest}");

        match Kind::of(&result.body) {
            Kind::Index => {
                debug!("Processing manifest list for image: {}:{}", image.repository, image.tag);
                let index: ImageIndex = parse(&url, "image index", result.body)?;
                let images = self.resolve_index(&session, &index)?;
                info!("Found {} images in manifest list for {}:{}", images.len(), image.repository, image.tag);
                Ok(images)
            }
            Kind::Manifest => {
                debug!("Processing single manifest for image: {}:{}", image.repository, image.tag);
                let manifest: ImageManifest = parse(&url, "image manifest", result.body)?;
                let image_info = self.resolve_manifest(&session, &manifest, content_digest)?;
                info!("Found image for {}:{}: {}", image.repository, image.tag, image_info.key());
                Ok(ImageMap::from([(image_info.key(), image_info)]))
            }
            Kind::Config | Kind::Unknown => Err(Error::UnsupportedContentType { url, content_type }),
        }
    }

    fn resolve_index(&self, session: &Session<'_>, index: &ImageIndex) -> Result<ImageMap, Error> {
        let mut images = ImageMap::new();
        for descriptor in &index.manifests {
            debug!("Processing manifest: {} ({})", descriptor.digest, descriptor.media_type);
            let Some(image_info) = self.resolve_descriptor(session, descriptor)? else {
                continue;
            };
            debug!("Generated imageInfo: {image_info:?}");
            if let Some(previous) = images.insert(image_info.key(), image_info) {
                debug!("Replaced earlier entry {} for the same platform.", previous.digest);
            }
        }
        Ok(images)
    }

    /// Returns `None` for entries that are not platform images, like
    /// attestations.
    fn resolve_descriptor(&self, session: &Session<'_>, descriptor: &ManifestDescriptor) -> Result<Option<ImageInfo>, Error> {
        let Some(platform) = descriptor.platform.as_ref() else {
            debug!("Skipping {} without platform.", descriptor.digest);
            return Ok(None);
        };
        if platform.architecture == UNKNOWN_ARCHITECTURE {
            debug!("Skipping {} with unknown architecture.", descriptor.digest);
            return Ok(None);
        }

        let manifest = self.fetch_manifest(session, &descriptor.digest)?;
        let image_info = match self.layer_source {
            LayerSource::Compressed => ImageInfo {
                variant:      infer_variant(&platform.architecture, platform.variant.as_deref()),
                os:           platform.os.clone(),
                architecture: platform.architecture.clone(),
                digest:       descriptor.digest.clone(),
                layers:       layer_digests(&manifest),
            },
            LayerSource::Uncompressed => {
                let config = self.fetch_config(session, &manifest.config.digest)?;
                from_config(config, descriptor.digest.clone())
            }
        };
        Ok(Some(image_info))
    }

    /// A lone manifest has no platform attached, so the config blob is always
    /// needed.
    fn resolve_manifest(&self, session: &Session<'_>, manifest: &ImageManifest, digest: String) -> Result<ImageInfo, Error> {
        let config = self.fetch_config(session, &manifest.config.digest)?;
        Ok(match self.layer_source {
            LayerSource::Compressed => ImageInfo {
                layers: layer_digests(manifest),
                ..from_config(config, digest)
            },
            LayerSource::Uncompressed => from_config(config, digest),
        })
    }

    fn fetch_manifest(&self, session: &Session<'_>, digest: &str) -> Result<ImageManifest, Error> {
        let url = self.manifest_url(session.repository, digest);
        let result = self.fetch(session, &url, ACCEPT_IMAGE_MANIFEST)?;
        if !is_image_manifest(&result.body) {
            return Err(Error::UnsupportedContentType {
                content_type: result.header("content-type").map(str::to_owned),
                url,
            });
        }
        parse(&url, "image manifest", result.body)
    }

    fn fetch_config(&self, session: &Session<'_>, digest: &str) -> Result<ImageConfig, Error> {
        let url = self.blob_url(session.repository, digest);
        let result = self.fetch(session, &url, ACCEPT_IMAGE_CONFIG)?;
        if !is_image_config(&result.body) {
            return Err(Error::UnexpectedShape {
                url,
                expected: "image config",
                reason: format!("got {:?}", Kind::of(&result.body)),
            });
        }
        parse(&url, "image config", result.body)
    }
}

fn parse<D: DeserializeOwned>(url: &str, expected: &'static str, body: Value) -> Result<D, Error> {
    serde_json::from_value(body).map_err(|e| Error::UnexpectedShape {
        url: url.to_owned(),
        expected,
        reason: e.to_string(),
    })
}

fn layer_digests(manifest: &ImageManifest) -> Vec<String> {
    manifest.layers.iter().map(|layer| layer.digest.clone()).collect()
}

fn from_config(config: ImageConfig, digest: String) -> ImageInfo {
    ImageInfo {
        variant: infer_variant(&config.architecture, config.variant.as_deref()),
        os: config.os,
        architecture: config.architecture,
        digest,
        layers: config.rootfs.diff_ids,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    use crate::image::{ImageInfo, ImageReference, Registry};
    use crate::manifest::{DOCKER_MANIFEST, DOCKER_MANIFEST_LIST, OCI_IMAGE_CONFIG, OCI_IMAGE_INDEX, OCI_IMAGE_MANIFEST};
    use crate::registries::resolver::{ContainerRegistry, LayerSource};
    use crate::registries::{Anonymous, Error, StaticToken};
    use crate::transport::TransportError;
    use crate::transport::mock::MockTransport;

    const BASE: &str = "registry.test/v2/";
    const TAG_URL: &str = "https://registry.test/v2/owner/app/manifests/latest";

    fn manifest_url(reference: &str) -> String {
        format!("https://registry.test/v2/owner/app/manifests/{reference}")
    }

    fn blob_url(digest: &str) -> String {
        format!("https://registry.test/v2/owner/app/blobs/{digest}")
    }

    fn reference() -> ImageReference {
        ImageReference::new(Registry::Other("registry.test".to_owned()), "owner/app", "latest")
    }

    fn descriptor(digest: &str, os: &str, architecture: &str, variant: Option<&str>) -> Value {
        let mut platform = json!({ "architecture": architecture, "os": os });
        if let Some(variant) = variant {
            platform["variant"] = json!(variant);
        }
        json!({ "mediaType": OCI_IMAGE_MANIFEST, "digest": digest, "size": 1234, "platform": platform })
    }

    fn index(descriptors: Vec<Value>) -> Value {
        json!({ "schemaVersion": 2, "mediaType": OCI_IMAGE_INDEX, "manifests": descriptors })
    }

    fn manifest(config_digest: &str, layers: &[&str]) -> Value {
        let layers: Vec<Value> = layers
            .iter()
            .map(|digest| json!({ "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "size": 100, "digest": digest }))
            .collect();
        json!({
            "schemaVersion": 2,
            "mediaType": OCI_IMAGE_MANIFEST,
            "config": { "mediaType": OCI_IMAGE_CONFIG, "size": 10, "digest": config_digest },
            "layers": layers
        })
    }

    fn config(os: &str, architecture: &str, variant: Option<&str>, diff_ids: &[&str]) -> Value {
        let mut value = json!({ "architecture": architecture, "os": os, "rootfs": { "type": "layers", "diff_ids": diff_ids } });
        if let Some(variant) = variant {
            value["variant"] = json!(variant);
        }
        value
    }

    fn registry(transport: MockTransport) -> ContainerRegistry<MockTransport> {
        ContainerRegistry::new(BASE, transport, Box::new(StaticToken::new("secret")))
    }

    #[test]
    fn index_with_attestation() {
        let transport = MockTransport::new()
            .with_json_and_headers(
                TAG_URL,
                index(vec![
                    descriptor("sha256:aaa", "linux", "amd64", None),
                    descriptor("sha256:att", "unknown", "unknown", None),
                ]),
                &[("Content-Type", OCI_IMAGE_INDEX), ("Docker-Content-Digest", "sha256:index")],
            )
            .with_json(&manifest_url("sha256:aaa"), manifest("sha256:cfg", &["sha256:l1", "sha256:l2"]));
        let registry = registry(transport);

        let images = registry.get_image_info(&reference()).unwrap();

        assert_eq!(images.len(), 1);
        assert_eq!(images["linux|amd64|"], ImageInfo {
            os:           "linux".to_owned(),
            architecture: "amd64".to_owned(),
            variant:      None,
            digest:       "sha256:aaa".to_owned(),
            layers:       vec!["sha256:l1".to_owned(), "sha256:l2".to_owned()],
        });
        // no config blob, nothing for the attestation
        assert_eq!(registry.transport.urls(), vec![TAG_URL.to_owned(), manifest_url("sha256:aaa")]);
    }

    #[test]
    fn request_headers() {
        let transport = MockTransport::new()
            .with_json(TAG_URL, index(vec![descriptor("sha256:aaa", "linux", "amd64", None)]))
            .with_json(&manifest_url("sha256:aaa"), manifest("sha256:cfg", &["sha256:l1"]));
        let registry = registry(transport);

        registry.get_image_info(&reference()).unwrap();

        let requests = registry.transport.requests();
        assert_eq!(
            requests[0].header("Accept").unwrap().split(',').collect::<Vec<_>>(),
            vec![DOCKER_MANIFEST_LIST, OCI_IMAGE_INDEX, DOCKER_MANIFEST, OCI_IMAGE_MANIFEST]
        );
        assert_eq!(requests[1].header("Accept").unwrap().split(',').collect::<Vec<_>>(), vec![
            DOCKER_MANIFEST,
            OCI_IMAGE_MANIFEST
        ]);
        assert!(requests.iter().all(|request| request.header("Authorization") == Some("Bearer secret")));
    }

    #[test]
    fn anonymous_requests_have_no_authorization() {
        let transport = MockTransport::new()
            .with_json(TAG_URL, index(vec![descriptor("sha256:aaa", "linux", "amd64", None)]))
            .with_json(&manifest_url("sha256:aaa"), manifest("sha256:cfg", &["sha256:l1"]));
        let registry = ContainerRegistry::new(BASE, transport, Box::new(Anonymous));

        registry.get_image_info(&reference()).unwrap();

        assert!(registry.transport.requests().iter().all(|request| request.header("Authorization").is_none()));
    }

    #[test]
    fn index_variants_and_duplicates() {
        let transport = MockTransport::new()
            .with_json(
                TAG_URL,
                json!({
                    "schemaVersion": 2,
                    "mediaType": DOCKER_MANIFEST_LIST,
                    "manifests": [
                        descriptor("sha256:arm64-a", "linux", "arm64", None),
                        descriptor("sha256:armv7", "linux", "arm", Some("v7")),
                        descriptor("sha256:arm64-b", "linux", "arm64", Some("v8")),
                    ]
                }),
            )
            .with_json(&manifest_url("sha256:arm64-a"), manifest("sha256:c1", &["sha256:a"]))
            .with_json(&manifest_url("sha256:armv7"), manifest("sha256:c2", &["sha256:b"]))
            .with_json(&manifest_url("sha256:arm64-b"), manifest("sha256:c3", &["sha256:c"]));
        let registry = registry(transport);

        let images = registry.get_image_info(&reference()).unwrap();

        assert_eq!(images.keys().cloned().collect::<Vec<_>>(), vec!["linux|arm64|v8", "linux|arm|v7"]);
        // last one wins
        assert_eq!(images["linux|arm64|v8"].digest, "sha256:arm64-b");
        assert_eq!(images["linux|arm64|v8"].layers, vec!["sha256:c"]);
        assert_eq!(images["linux|arm|v7"].variant.as_deref(), Some("v7"));
    }

    #[test]
    fn index_entries_without_platform_are_skipped() {
        let transport = MockTransport::new().with_json(
            TAG_URL,
            index(vec![json!({ "mediaType": OCI_IMAGE_MANIFEST, "digest": "sha256:sig", "size": 12 })]),
        );
        let registry = registry(transport);

        assert!(registry.get_image_info(&reference()).unwrap().is_empty());
        assert_eq!(registry.transport.urls(), vec![TAG_URL.to_owned()]);
    }

    #[test]
    fn single_arm64_manifest() {
        let transport = MockTransport::new()
            .with_json_and_headers(TAG_URL, manifest("sha256:cfg", &["sha256:l1", "sha256:l2"]), &[(
                "docker-content-digest",
                "sha256:top",
            )])
            .with_json(&blob_url("sha256:cfg"), config("linux", "arm64", None, &["sha256:d1", "sha256:d2"]));
        let registry = registry(transport);

        let images = registry.get_image_info(&reference()).unwrap();

        assert_eq!(images.len(), 1);
        assert_eq!(images["linux|arm64|v8"], ImageInfo {
            os:           "linux".to_owned(),
            architecture: "arm64".to_owned(),
            variant:      Some("v8".to_owned()),
            digest:       "sha256:top".to_owned(),
            layers:       vec!["sha256:l1".to_owned(), "sha256:l2".to_owned()],
        });
        let requests = registry.transport.requests();
        assert_eq!(requests[1].url, blob_url("sha256:cfg"));
        assert_eq!(requests[1].header("Accept").unwrap().split(',').collect::<Vec<_>>(), vec![
            "application/vnd.docker.container.image.v1+json",
            OCI_IMAGE_CONFIG
        ]);
    }

    #[test]
    fn single_manifest_by_digest_without_digest_header() {
        let digest = "sha256:0123abcd";
        let transport = MockTransport::new()
            .with_json(&manifest_url(digest), json!({
                "schemaVersion": 2,
                "mediaType": DOCKER_MANIFEST,
                "config": { "mediaType": "application/vnd.docker.container.image.v1+json", "size": 10, "digest": "sha256:cfg" },
                "layers": []
            }))
            .with_json(&blob_url("sha256:cfg"), config("linux", "amd64", None, &[]));
        let registry = registry(transport);
        let image = ImageReference::new(Registry::Other("registry.test".to_owned()), "owner/app", digest);

        let images = registry.get_image_info(&image).unwrap();

        assert_eq!(images["linux|amd64|"].digest, digest);
        assert!(images["linux|amd64|"].layers.is_empty());
    }

    #[test]
    fn single_manifest_by_tag_without_digest_header() {
        let transport = MockTransport::new()
            .with_json(TAG_URL, manifest("sha256:cfg", &["sha256:l1"]))
            .with_json(&blob_url("sha256:cfg"), config("linux", "amd64", None, &["sha256:d1"]));
        let registry = registry(transport);

        let images = registry.get_image_info(&reference()).unwrap();

        // the digest stays unknown, callers decide whether that is fatal
        assert_eq!(images["linux|amd64|"].digest, "");
        assert_eq!(images["linux|amd64|"].layers, vec!["sha256:l1"]);
    }

    #[test]
    fn uncompressed_layers() {
        let transport = MockTransport::new()
            .with_json(
                TAG_URL,
                index(vec![
                    descriptor("sha256:aaa", "linux", "amd64", None),
                    descriptor("sha256:bbb", "linux", "arm64", None),
                ]),
            )
            .with_json(&manifest_url("sha256:aaa"), manifest("sha256:c1", &["sha256:l1"]))
            .with_json(&manifest_url("sha256:bbb"), manifest("sha256:c2", &["sha256:l2"]))
            .with_json(&blob_url("sha256:c1"), config("linux", "amd64", None, &["sha256:d1"]))
            .with_json(&blob_url("sha256:c2"), config("linux", "arm64", Some("v8"), &["sha256:d2"]));
        let registry = registry(transport).with_layer_source(LayerSource::Uncompressed);

        let images = registry.get_image_info(&reference()).unwrap();

        assert_eq!(images["linux|amd64|"].layers, vec!["sha256:d1"]);
        assert_eq!(images["linux|amd64|"].digest, "sha256:aaa");
        assert_eq!(images["linux|arm64|v8"].layers, vec!["sha256:d2"]);
        assert_eq!(registry.transport.urls().len(), 5);
    }

    #[test]
    fn uncompressed_single_manifest() {
        let transport = MockTransport::new()
            .with_json_and_headers(TAG_URL, manifest("sha256:cfg", &["sha256:l1"]), &[("docker-content-digest", "sha256:top")])
            .with_json(&blob_url("sha256:cfg"), config("windows", "amd64", None, &["sha256:d1"]));
        let registry = registry(transport).with_layer_source(LayerSource::Uncompressed);

        let images = registry.get_image_info(&reference()).unwrap();

        assert_eq!(images["windows|amd64|"].layers, vec!["sha256:d1"]);
        assert_eq!(images["windows|amd64|"].digest, "sha256:top");
    }

    #[test]
    fn unsupported_top_level_content() {
        let transport = MockTransport::new().with_json_and_headers(
            TAG_URL,
            json!({ "schemaVersion": 1, "name": "owner/app", "fsLayers": [] }),
            &[("Content-Type", "application/vnd.docker.distribution.manifest.v1+prettyjws")],
        );
        let registry = registry(transport);

        let error = registry.get_image_info(&reference()).unwrap_err();

        assert_eq!(error, Error::UnsupportedContentType {
            url:          TAG_URL.to_owned(),
            content_type: Some("application/vnd.docker.distribution.manifest.v1+prettyjws".to_owned()),
        });
    }

    #[test]
    fn content_type_header_does_not_drive_branching() {
        let transport = MockTransport::new()
            .with_json_and_headers(TAG_URL, index(vec![descriptor("sha256:aaa", "linux", "amd64", None)]), &[(
                "Content-Type",
                "application/json",
            )])
            .with_json(&manifest_url("sha256:aaa"), manifest("sha256:cfg", &["sha256:l1"]));

        assert_eq!(registry(transport).get_image_info(&reference()).unwrap().len(), 1);
    }

    #[test]
    fn unsupported_platform_manifest_discards_results() {
        let transport = MockTransport::new()
            .with_json(
                TAG_URL,
                index(vec![
                    descriptor("sha256:aaa", "linux", "amd64", None),
                    descriptor("sha256:bbb", "linux", "arm64", None),
                    descriptor("sha256:ccc", "linux", "s390x", None),
                ]),
            )
            .with_json(&manifest_url("sha256:aaa"), manifest("sha256:c1", &["sha256:l1"]))
            .with_json(&manifest_url("sha256:bbb"), index(vec![]));
        let registry = registry(transport);

        let error = registry.get_image_info(&reference()).unwrap_err();

        assert!(matches!(error, Error::UnsupportedContentType { ref url, .. } if *url == manifest_url("sha256:bbb")));
        // the remaining entries are abandoned
        assert_eq!(registry.transport.urls().len(), 3);
    }

    #[test]
    fn unexpected_config_shape() {
        let transport = MockTransport::new()
            .with_json(TAG_URL, manifest("sha256:cfg", &["sha256:l1"]))
            .with_json(&blob_url("sha256:cfg"), json!({ "architecture": "amd64", "os": "linux", "rootfs": { "diff_ids": [1] } }));

        let error = registry(transport).get_image_info(&reference()).unwrap_err();

        assert!(matches!(error, Error::UnexpectedShape { expected: "image config", .. }));
    }

    #[test]
    fn transport_errors_are_propagated() {
        let not_found = TransportError::Status {
            url:         manifest_url("sha256:aaa"),
            status:      404,
            status_text: "Not Found".to_owned(),
        };
        let transport = MockTransport::new()
            .with_json(TAG_URL, index(vec![descriptor("sha256:aaa", "linux", "amd64", None)]))
            .with_error(&manifest_url("sha256:aaa"), not_found.clone());

        let error = registry(transport).get_image_info(&reference()).unwrap_err();

        assert_eq!(error, Error::Transport(not_found));
    }

    #[test]
    fn authentication_failure_stops_before_fetching() {
        struct Failing;
        impl crate::registries::TokenProvider for Failing {
            fn get_token(&self, repository: &str) -> Result<String, Error> {
                Err(Error::Authentication {
                    repository: repository.to_owned(),
                    reason:     "denied".to_owned(),
                })
            }

            fn get_credentials(&self) -> Option<&crate::registries::Credentials> {
                None
            }
        }

        let registry = ContainerRegistry::new(BASE, MockTransport::new(), Box::new(Failing));

        let error = registry.get_image_info(&reference()).unwrap_err();

        assert_eq!(error.to_string(), "Could not get a token for `owner/app`: denied");
        assert!(registry.transport.urls().is_empty());
    }
}
