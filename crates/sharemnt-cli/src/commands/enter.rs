//! Stage 1: locate the container and re-exec inside its mount namespace.

use sharemnt_common::config::ShareMntConfig;
use sharemnt_core::locator::Locator;
use sharemnt_runtime::launcher;

/// Locates the current container from the host view and execs the
/// namespace helper. Only returns on failure.
///
/// # Errors
///
/// Returns an error if the container cannot be located or the helper
/// cannot be executed.
pub fn execute(config: &ShareMntConfig) -> anyhow::Result<i32> {
    let locator = Locator::new(config.identity)?;
    let state = locator.locate(&config.host_search_roots)?;
    tracing::info!(
        pid = state.init_process_pid,
        rootfs = %state.config.rootfs.display(),
        "located container"
    );
    match launcher::enter(&state, &config.nsenter, std::env::args_os().collect())? {}
}
