use clap::{Args, Parser, Subcommand};

use crate::transport::DEFAULT_TIMEOUT_SECS;
use crate::utils::{Layers, OutputFormat};

#[derive(Parser, Debug)]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub(crate) mode: Mode,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Mode {
    /// Inspect mode: Enter a container image and receive the digest and layers
    /// of every platform it is available for.
    #[command(alias = "i")]
    Inspect(InspectArguments),

    /// Digest mode: Enter a container image and a platform and receive the
    /// manifest digest of that platform.
    #[command(alias = "d")]
    Digest(DigestArguments),
}

#[derive(Args, Debug, Clone)]
pub struct InspectArguments {
    // Using positional argument instead of named argument
    #[arg(value_name = "IMAGE", help = "The container image including the tag or digest, e.g. ghcr.io/owner/app:1.0.")]
    pub(crate) input: String,

    #[arg(long, short, help = "How the result is printed.", default_value = OutputFormat::Json)]
    pub(crate) output: OutputFormat,

    #[command(flatten)]
    pub(crate) common: CommonOptions,
}

#[derive(Args, Debug, Clone)]
pub struct DigestArguments {
    // Using positional argument instead of named argument
    #[arg(value_name = "IMAGE", help = "The container image including the tag or digest, e.g. ghcr.io/owner/app:1.0.")]
    pub(crate) input: String,

    #[arg(long, short, help = "The platform as os/architecture[/variant], e.g. linux/arm64/v8.")]
    pub(crate) platform: String,

    #[command(flatten)]
    pub(crate) common: CommonOptions,
}

#[derive(Args, Debug, Clone)]
pub struct CommonOptions {
    #[arg(long, help = "Which layer digests should be reported.", default_value = Layers::Compressed)]
    pub(crate) layers: Layers,

    #[arg(long, help = "Timeout in seconds for every single request.", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub(crate) timeout: u64,

    #[arg(long, env = "REGISTRY_USERNAME", requires = "password", help = "Username used to request a registry token.")]
    pub(crate) username: Option<String>,

    #[arg(
        long,
        env = "REGISTRY_PASSWORD",
        hide_env_values = true,
        requires = "username",
        help = "Password or access token used to request a registry token."
    )]
    pub(crate) password: Option<String>,

    #[arg(
        long,
        env = "REGISTRY_TOKEN",
        hide_env_values = true,
        help = "A bearer token to use as is, skips the token request. Registries other than Docker Hub, ghcr.io and \
                mcr.microsoft.com are accessed anonymously without it."
    )]
    pub(crate) token: Option<String>,

    #[arg(long, short, help = "Activates debug logging.")]
    pub(crate) debug: bool,

    #[arg(long, short, help = "Will print out only the result, errors go to stderr.")]
    pub(crate) quiet: bool,
}
