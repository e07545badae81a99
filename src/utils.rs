use std::fmt::Display;
use std::time::Duration;

use clap::builder::OsStr;
use tracing::{debug, error, info, warn};

use crate::cli;
use crate::image::{ImageMap, ImageReference, Registry, infer_variant, platform_key};
use crate::registries::dockerhub::DockerHub;
use crate::registries::ghcr::GitHub;
use crate::registries::resolver::{ContainerRegistry, LayerSource};
use crate::registries::{Anonymous, Credentials, StaticToken, TokenProvider};
use crate::transport::HttpTransport;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

// This needs to be OsStr since it is used by clap.
impl From<OutputFormat> for OsStr {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Json => Self::from("json"),
            OutputFormat::Text => Self::from("text"),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// Which layer digests are reported, see `LayerSource`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum Layers {
    /// Compressed digests from the platform manifests.
    #[default]
    Compressed,
    /// Uncompressed `diff_ids` from the config blobs.
    Uncompressed,
}

// This needs to be OsStr since it is used by clap.
impl From<Layers> for OsStr {
    fn from(value: Layers) -> Self {
        match value {
            Layers::Compressed => Self::from("compressed"),
            Layers::Uncompressed => Self::from("uncompressed"),
        }
    }
}

impl Display for Layers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compressed => write!(f, "compressed"),
            Self::Uncompressed => write!(f, "uncompressed"),
        }
    }
}

impl From<Layers> for LayerSource {
    fn from(value: Layers) -> Self {
        match value {
            Layers::Compressed => Self::Compressed,
            Layers::Uncompressed => Self::Uncompressed,
        }
    }
}

/// Picks the token provider matching the registry of the image. A given
/// token always wins.
fn token_provider(registry: &Registry, common: &cli::CommonOptions, transport: &HttpTransport) -> Box<dyn TokenProvider> {
    if let Some(token) = &common.token {
        return Box::new(StaticToken::new(token.clone()));
    }
    let credentials = match (&common.username, &common.password) {
        (Some(username), Some(password)) => Some(Credentials::new(username.clone(), password.clone())),
        (None, None) => None,
        _ => {
            warn!("Username and password have to be given together, requesting the token anonymously.");
            None
        }
    };
    match registry {
        Registry::DockerHub => Box::new(DockerHub::new(transport.clone(), credentials)),
        Registry::GitHub => Box::new(GitHub::new(transport.clone(), credentials)),
        Registry::Mcr | Registry::Other(_) => Box::new(Anonymous),
    }
}

/// Parses the image and resolves it against its registry.
fn resolve(input: &str, common: &cli::CommonOptions) -> Result<ImageMap, Box<dyn std::error::Error>> {
    let image: ImageReference = input.parse()?;
    debug!("Resolving {image}, reporting {} layers", common.layers);
    let transport = HttpTransport::new(Duration::from_secs(common.timeout));
    let provider = token_provider(&image.registry, common, &transport);
    let registry = ContainerRegistry::new(image.registry.base_url(), transport, provider).with_layer_source(common.layers.into());
    Ok(registry.get_image_info(&image)?)
}

/// Renders the image map, one line per platform for text output.
fn render(images: &ImageMap, format: OutputFormat) -> Result<String, serde_json::Error> {
    debug!("Rendering {} platform(s) as {format}", images.len());
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(images),
        OutputFormat::Text => Ok(images
            .iter()
            .map(|(key, image)| {
                let digest = if image.digest.is_empty() { "-" } else { &image.digest };
                format!("{key}\t{digest}\t{} layers", image.layers.len())
            })
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

/// Turns `os/architecture[/variant]` into the key used in the image map. The
/// arm64 variant is inferred the same way as for resolved images.
pub fn parse_platform(platform: &str) -> Option<String> {
    let mut parts = platform.trim().split('/');
    let os = parts.next().filter(|os| !os.is_empty())?;
    let architecture = parts.next().filter(|architecture| !architecture.is_empty())?;
    let variant = parts.next();
    if parts.next().is_some() {
        return None;
    }
    Some(platform_key(os, architecture, infer_variant(architecture, variant).as_deref()))
}

/// Looks up the manifest digest of one platform. A platform without a known
/// digest is an error as well.
fn platform_digest<'a>(images: &'a ImageMap, key: &str) -> Result<&'a str, String> {
    let Some(image) = images.get(key) else {
        let available: Vec<&String> = images.keys().collect();
        return Err(format!("not available for `{key}`, found: {available:?}"));
    };
    if image.digest.is_empty() {
        return Err(format!("the registry did not report a digest for `{key}`"));
    }
    Ok(&image.digest)
}

fn report_error(quiet: bool, message: &str) {
    if quiet {
        eprintln!("{message}");
    } else {
        error!("{message}");
    }
}

/// Handles the inspect mode, returns false if the image could not be resolved.
pub fn handle_inspect(inspect_mode: &cli::InspectArguments) -> bool {
    let images = match resolve(&inspect_mode.input, &inspect_mode.common) {
        Ok(images) => images,
        Err(e) => {
            report_error(inspect_mode.common.quiet, &format!("Could not resolve `{}`: {e}", inspect_mode.input));
            return false;
        }
    };
    info!("===> Found {} platform(s) for {}", images.len(), inspect_mode.input);
    match render(&images, inspect_mode.output) {
        Ok(rendered) => {
            println!("{rendered}");
            true
        }
        Err(e) => {
            report_error(inspect_mode.common.quiet, &format!("Could not render result: {e}"));
            false
        }
    }
}

/// Handles the digest mode, returns false if the image could not be resolved
/// or is not available for the platform.
pub fn handle_digest(digest_mode: &cli::DigestArguments) -> bool {
    let Some(key) = parse_platform(&digest_mode.platform) else {
        report_error(digest_mode.common.quiet, &format!("Invalid platform `{}`.", digest_mode.platform));
        return false;
    };
    let images = match resolve(&digest_mode.input, &digest_mode.common) {
        Ok(images) => images,
        Err(e) => {
            report_error(digest_mode.common.quiet, &format!("Could not resolve `{}`: {e}", digest_mode.input));
            return false;
        }
    };
    match platform_digest(&images, &key) {
        Ok(digest) => {
            info!("===> Digest for {} ({}): {digest}", digest_mode.input, digest_mode.platform);
            println!("{digest}");
            true
        }
        Err(e) => {
            report_error(digest_mode.common.quiet, &format!("`{}` {e}", digest_mode.input));
            false
        }
    }
}
