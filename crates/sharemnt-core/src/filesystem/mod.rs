//! Filesystem setup for the nested container.
//!
//! Provides mount propagation control, mount application under a rootfs,
//! and device node creation.

pub mod device;
pub mod mount;

use std::io;
use std::path::{Path, PathBuf};

use sharemnt_common::error::{Result, ShareMntError};

/// Joins a container path onto the rootfs, treating it as relative.
#[must_use]
pub fn in_rootfs(rootfs: &Path, path: &Path) -> PathBuf {
    rootfs.join(path.strip_prefix("/").unwrap_or(path))
}

/// Checks that `rootfs` exists.
///
/// # Errors
///
/// Returns [`ShareMntError::ConfigValidation`] if it does not exist, or
/// [`ShareMntError::Io`] if it cannot be inspected.
pub fn check_rootfs(rootfs: &Path) -> Result<()> {
    match std::fs::metadata(rootfs) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ShareMntError::ConfigValidation {
            message: format!("rootfs {} does not exist", rootfs.display()),
        }),
        Err(e) => Err(ShareMntError::io(rootfs, e)),
    }
}
