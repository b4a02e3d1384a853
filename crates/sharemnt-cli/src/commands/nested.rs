//! Stage 2: build the nested container and run the command in it.

use std::path::PathBuf;

use sharemnt_common::config::ShareMntConfig;
use sharemnt_common::types::IdGenerator;
use sharemnt_core::filesystem::mount::KernelMarker;
use sharemnt_core::locator::Locator;
use sharemnt_runtime::backend::linux::LinuxFactory;
use sharemnt_runtime::nested;
use sharemnt_runtime::runner::Runner;

/// Shares `paths`, runs `command` in a nested container and returns its
/// exit code.
///
/// # Errors
///
/// Returns an error if the base state cannot be located, a path cannot be
/// shared, or the nested container fails before its process exits.
pub fn execute(config: &ShareMntConfig, paths: &[PathBuf], command: Vec<String>) -> anyhow::Result<i32> {
    let locator = Locator::new(config.identity)?;
    let base = locator.locate(&config.namespace_search_roots)?;

    let mut ids = IdGenerator::from_os();
    let nested = nested::assemble(&base, paths, command, &KernelMarker, &mut ids)?;
    tracing::info!(id = %nested.id, shares = paths.len(), "running nested container");

    let factory = LinuxFactory::new(&config.engine_root, config.default_entrypoint.clone())?;
    Ok(Runner::new(factory).run(nested)?)
}
