//! # share-mnt
//!
//! Shares host-side directories into a running container by nesting a
//! container with shared bind mounts inside its mount namespace.
//! The exit status is that of the command run in the nested container.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;

use clap::Parser;
use sharemnt_common::constants::FAILURE_EXIT_CODE;
use sharemnt_common::error::ShareMntError;

use crate::commands::Cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match commands::execute(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let reported = err
                .downcast_ref::<ShareMntError>()
                .is_some_and(ShareMntError::is_reported);
            if !reported {
                tracing::error!("{err:#}");
            }
            std::process::exit(FAILURE_EXIT_CODE);
        }
    }
}
