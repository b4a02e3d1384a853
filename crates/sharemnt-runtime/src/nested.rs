//! Nested container assembly (stage 2).
//!
//! Runs inside the target's mount namespace. The located base state
//! supplies the rootfs, devices and mounts; every shared path is created if
//! needed, marked shared, and appended as a recursive bind mount.

use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use sharemnt_common::error::{Result, ShareMntError};
use sharemnt_common::state::{
    Capabilities, ContainerConfig, ContainerState, MountSpec, Namespace, NamespaceType,
};
use sharemnt_common::types::{ContainerId, IdGenerator};
use sharemnt_core::capability;
use sharemnt_core::filesystem::mount::{self, SharedMarker};

/// Mode of share directories created on demand.
const SHARE_DIR_MODE: u32 = 0o755;

/// A fully assembled nested container, ready for the lifecycle runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedContainer {
    /// Freshly generated identity.
    pub id: ContainerId,
    /// Final container configuration.
    pub config: ContainerConfig,
    /// Command to run; empty selects the engine's default entrypoint.
    pub args: Vec<String>,
}

/// Builds the configuration of a nested container from a base state.
///
/// Each [`NestedConfigBuilder::share`] takes effect on the host immediately
/// (directory creation, shared propagation); the configuration itself only
/// leaves the builder through [`NestedConfigBuilder::build`].
pub struct NestedConfigBuilder<'a> {
    config: ContainerConfig,
    marker: &'a dyn SharedMarker,
}

impl<'a> NestedConfigBuilder<'a> {
    /// Starts from the rootfs, devices and mounts of `base`, with shared
    /// root propagation, a mount namespace only, and every capability the
    /// kernel supports.
    pub fn from_base(base: &ContainerState, marker: &'a dyn SharedMarker) -> Self {
        let config = ContainerConfig {
            rootfs: base.config.rootfs.clone(),
            devices: base.config.devices.clone(),
            mounts: base.config.mounts.clone(),
            capabilities: Some(Capabilities::Names(capability::all_supported())),
            root_propagation: mount::flag_bits(MsFlags::MS_SHARED),
            namespaces: vec![Namespace::new(NamespaceType::Mount)],
            uid_mappings: Vec::new(),
        };
        Self { config, marker }
    }

    /// Creates `path` if missing, marks it shared, and appends its bind
    /// mount.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or marked
    /// shared.
    pub fn share(mut self, path: &Path) -> Result<Self> {
        let path = std::path::absolute(path).map_err(|e| ShareMntError::io(path, e))?;
        ensure_dir(&path)?;
        self.marker.make_shared(&path)?;
        self.config.mounts.push(shared_bind(&path));
        Ok(self)
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> ContainerConfig {
        self.config
    }
}

/// Returns the bind mount that exposes the shared `path` at the same
/// location inside the container.
#[must_use]
pub fn shared_bind(path: &Path) -> MountSpec {
    MountSpec {
        source: path.to_string_lossy().into_owned(),
        destination: path.to_path_buf(),
        device: MountSpec::BIND.to_string(),
        flags: mount::flag_bits(mount::recursive_bind()),
        propagation_flags: vec![mount::flag_bits(MsFlags::MS_SHARED)],
        data: String::new(),
    }
}

/// Creates `path` and its missing parents. Existing paths are left alone.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    DirBuilder::new()
        .recursive(true)
        .mode(SHARE_DIR_MODE)
        .create(path)
        .map_err(|e| ShareMntError::io(path, e))?;
    tracing::info!(path = %path.display(), "created share directory");
    Ok(())
}

/// Assembles the nested container for `paths` and `args` on top of `base`.
///
/// # Errors
///
/// Returns an error as soon as a path cannot be prepared; nothing is
/// assembled in that case.
pub fn assemble(
    base: &ContainerState,
    paths: &[PathBuf],
    args: Vec<String>,
    marker: &dyn SharedMarker,
    ids: &mut IdGenerator,
) -> Result<NestedContainer> {
    let builder = paths
        .iter()
        .try_fold(NestedConfigBuilder::from_base(base, marker), |b, path| b.share(path))?;
    let nested = NestedContainer {
        id: ids.generate(),
        config: builder.build(),
        args,
    };
    tracing::debug!(
        id = %nested.id,
        rootfs = %nested.config.rootfs.display(),
        mounts = nested.config.mounts.len(),
        "nested container assembled"
    );
    Ok(nested)
}
