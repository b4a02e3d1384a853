//! CLI definition and stage dispatch.

pub mod enter;
pub mod nested;

use std::path::PathBuf;

use clap::Parser;
use sharemnt_common::config::{IdentityStrategy, ShareMntConfig};
use sharemnt_common::constants::ENGINE_STATE_ROOT;

/// Share host paths into a running container.
#[derive(Parser, Debug)]
#[command(name = "share-mnt", version, about, long_about = None)]
pub struct Cli {
    /// Run inside the target mount namespace. Set by the re-exec, not by
    /// operators.
    #[arg(long = "stage2", hide = true)]
    pub stage2: bool,

    /// How the current container is identified.
    #[arg(long, default_value_t = IdentityStrategy::Cgroup)]
    pub identity: IdentityStrategy,

    /// State directory of the nested container engine.
    #[arg(long, default_value = ENGINE_STATE_ROOT)]
    pub engine_root: PathBuf,

    /// Paths to create if missing and share into the container.
    pub paths: Vec<PathBuf>,

    /// Command to run in the nested container, after `--`.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// The stage an invocation runs, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Locate the container and re-exec inside its mount namespace.
    Enter,
    /// Build and run the nested container.
    Nested,
}

impl Cli {
    /// Returns the stage selected by the command line.
    pub const fn stage(&self) -> Stage {
        if self.stage2 { Stage::Nested } else { Stage::Enter }
    }

    /// Applies command-line overrides to the default configuration.
    pub fn config(&self) -> ShareMntConfig {
        ShareMntConfig {
            identity: self.identity,
            engine_root: self.engine_root.clone(),
            ..ShareMntConfig::default()
        }
    }
}

/// Runs the selected stage and returns the process exit code.
///
/// # Errors
///
/// Returns an error if the stage fails before the nested process exits.
pub fn execute(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.config();
    match cli.stage() {
        Stage::Enter => enter::execute(&config),
        Stage::Nested => nested::execute(&config, &cli.paths, cli.command),
    }
}
