//! Device node creation inside the nested container rootfs.

use std::path::Path;

use nix::mount::{MsFlags, mount};
use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use nix::unistd::{Gid, Uid, chown};
use sharemnt_common::error::{Result, ShareMntError};
use sharemnt_common::state::{DeviceKind, DeviceSpec};

use super::in_rootfs;

/// Creates a device node below `rootfs`.
///
/// Existing nodes are left untouched. When `mknod(2)` is refused, as it is
/// without `CAP_MKNOD` or inside a user namespace, the host node is
/// bind-mounted onto an empty file instead.
///
/// # Errors
///
/// Returns an error if the node can neither be created nor bind-mounted.
pub fn create_device(rootfs: &Path, dev: &DeviceSpec) -> Result<()> {
    let dest = in_rootfs(rootfs, &dev.path);
    if dest.symlink_metadata().is_ok() {
        tracing::debug!(path = %dest.display(), "device node exists");
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ShareMntError::io(parent, e))?;
    }

    let major = u64::try_from(dev.major).map_err(|_| invalid_number(dev, "major"))?;
    let minor = u64::try_from(dev.minor).map_err(|_| invalid_number(dev, "minor"))?;
    let perm = Mode::from_bits_truncate(dev.file_mode & 0o7777);

    match mknod(&dest, node_type(dev.kind), perm, makedev(major, minor)) {
        Ok(()) => {
            chown(&dest, Some(Uid::from_raw(dev.uid)), Some(Gid::from_raw(dev.gid)))
                .map_err(|e| ShareMntError::sys(format!("chown {}", dest.display()), e))?;
        }
        Err(nix::Error::EPERM) => bind_host_device(&dev.path, &dest)?,
        Err(e) => return Err(ShareMntError::sys(format!("mknod {}", dest.display()), e)),
    }
    tracing::debug!(path = %dest.display(), kind = %dev.kind.code(), major, minor, "device created");
    Ok(())
}

const fn node_type(kind: DeviceKind) -> SFlag {
    match kind {
        DeviceKind::Char => SFlag::S_IFCHR,
        DeviceKind::Block => SFlag::S_IFBLK,
        DeviceKind::Fifo => SFlag::S_IFIFO,
    }
}

fn bind_host_device(host: &Path, dest: &Path) -> Result<()> {
    let _ = std::fs::File::create(dest).map_err(|e| ShareMntError::io(dest, e))?;
    mount(Some(host), dest, None::<&str>, MsFlags::MS_BIND, None::<&str>)
        .map_err(|e| ShareMntError::sys(format!("bind device {}", host.display()), e))
}

fn invalid_number(dev: &DeviceSpec, field: &str) -> ShareMntError {
    ShareMntError::ConfigValidation {
        message: format!("device {} has a negative {field} number", dev.path.display()),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn null_device() -> DeviceSpec {
        DeviceSpec {
            kind: DeviceKind::Char,
            path: PathBuf::from("/dev/null"),
            major: 1,
            minor: 3,
            file_mode: 0o666,
            uid: 0,
            gid: 0,
        }
    }

    #[test]
    fn existing_nodes_are_left_alone() {
        let rootfs = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(rootfs.path().join("dev")).unwrap();
        std::fs::write(rootfs.path().join("dev/null"), "").unwrap();

        create_device(rootfs.path(), &null_device()).unwrap();
        assert!(rootfs.path().join("dev/null").is_file());
    }

    #[test]
    fn negative_numbers_are_rejected() {
        let rootfs = tempfile::tempdir().unwrap();
        let dev = DeviceSpec {
            major: -1,
            ..null_device()
        };
        assert!(matches!(
            create_device(rootfs.path(), &dev),
            Err(ShareMntError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn node_type_matches_kind() {
        assert_eq!(node_type(DeviceKind::Block), SFlag::S_IFBLK);
        assert_eq!(node_type(DeviceKind::Fifo), SFlag::S_IFIFO);
    }
}
