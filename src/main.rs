use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::utils::{handle_digest, handle_inspect};

mod cli;
mod image;
mod manifest;
mod registries;
mod transport;
mod utils;

fn main() -> ExitCode {
    // Needs to be initialised so that ureq can use rustls and not be dependendant
    // on openssl. This makes building for musl a lot easier.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");
    let cli = cli::Cli::parse();
    let common = match &cli.mode {
        cli::Mode::Inspect(inspect_mode) => &inspect_mode.common,
        cli::Mode::Digest(digest_mode) => &digest_mode.common,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if common.debug { "debug" } else { "info" }));
    let custom_format = fmt::format()
        .with_target(false)
        .with_file(true)
        .with_level(true)
        .with_line_number(true)
        .compact();
    // Logs go to stderr, stdout only carries the result.
    let fmt_layer = fmt::layer().event_format(custom_format).with_writer(std::io::stderr);

    // If quiet flag is set, we do not initialise and use the tracing_subscriber.
    // Only (e)print(ln) will be printed.
    if !common.quiet {
        tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
    }

    let success = match &cli.mode {
        cli::Mode::Inspect(inspect_mode) => handle_inspect(inspect_mode),
        cli::Mode::Digest(digest_mode) => handle_digest(digest_mode),
    };

    if success { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
