//! Mount utilities for share points and the nested container's rootfs.
//!
//! Handles marking host paths shared, setting root propagation in a new
//! mount namespace, and applying configured mounts in order.

use std::fs;
use std::path::{Path, PathBuf};

use nix::mount::{MsFlags, mount};
use sharemnt_common::constants::{CGROUP_ROOT, SELF_MOUNTINFO_FILE};
use sharemnt_common::error::{Result, ShareMntError};
use sharemnt_common::state::MountSpec;

use super::in_rootfs;

/// Marks paths as shared mount points.
///
/// Kernel mount operations sit behind this trait so that configuration
/// assembly can run without privileges.
pub trait SharedMarker {
    /// Makes the filesystem object at `path` a shared mount point.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be mounted or re-flagged.
    fn make_shared(&self, path: &Path) -> Result<()>;
}

/// [`SharedMarker`] that issues the `mount(2)` calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelMarker;

impl SharedMarker for KernelMarker {
    fn make_shared(&self, path: &Path) -> Result<()> {
        make_shared(path)
    }
}

/// Flags of a recursive bind mount.
#[must_use]
pub const fn recursive_bind() -> MsFlags {
    MsFlags::MS_BIND.union(MsFlags::MS_REC)
}

/// Converts raw flag bits from a persisted config.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub const fn ms_flags(bits: u64) -> MsFlags {
    MsFlags::from_bits_truncate(bits as libc::c_ulong)
}

/// Converts flags into the bits stored in a persisted config.
#[allow(clippy::useless_conversion)]
#[must_use]
pub fn flag_bits(flags: MsFlags) -> u64 {
    u64::from(flags.bits())
}

/// Makes `path` a shared mount point.
///
/// A path that is not yet a mount point is first bind-mounted onto itself,
/// since propagation can only be set on mounts.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read or a mount fails.
pub fn make_shared(path: &Path) -> Result<()> {
    if !is_mount_point(path)? {
        bind_onto_itself(path, MsFlags::MS_BIND)?;
    }
    mount(
        None::<&str>,
        path,
        None::<&str>,
        MsFlags::MS_SHARED,
        None::<&str>,
    )
    .map_err(|e| ShareMntError::sys(format!("make {} shared", path.display()), e))?;
    tracing::info!(path = %path.display(), "marked shared");
    Ok(())
}

/// Bind-mounts `path` onto itself with the given flags.
///
/// # Errors
///
/// Returns an error if the `mount(2)` call fails.
pub fn bind_onto_itself(path: &Path, flags: MsFlags) -> Result<()> {
    mount(Some(path), path, None::<&str>, flags, None::<&str>)
        .map_err(|e| ShareMntError::sys(format!("bind mount {} onto itself", path.display()), e))?;
    tracing::debug!(path = %path.display(), "bind-mounted onto itself");
    Ok(())
}

/// Returns whether `path` is a mount point in the current mount namespace.
///
/// # Errors
///
/// Returns an error if the path cannot be canonicalized or the mount table
/// cannot be read.
pub fn is_mount_point(path: &Path) -> Result<bool> {
    let path = fs::canonicalize(path).map_err(|e| ShareMntError::io(path, e))?;
    Ok(read_mountinfo()?.iter().any(|m| m.mount_point == path))
}

/// Makes the mount containing `path` private if it is shared.
///
/// Mounts set up below the nested rootfs must not leak into the peer group
/// of the mount that holds it, even though `/` itself is shared.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read, no mount contains
/// the path, or the `mount(2)` call fails.
pub fn make_parent_private(path: &Path) -> Result<()> {
    let path = fs::canonicalize(path).map_err(|e| ShareMntError::io(path, e))?;
    let mounts = read_mountinfo()?;
    let parent = containing_mount(&mounts, &path).ok_or_else(|| ShareMntError::ConfigValidation {
        message: format!("no mount contains {}", path.display()),
    })?;
    if !parent.shared {
        return Ok(());
    }
    mount(
        None::<&str>,
        &parent.mount_point,
        None::<&str>,
        MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| ShareMntError::sys(format!("make {} private", parent.mount_point.display()), e))?;
    tracing::debug!(mount = %parent.mount_point.display(), "parent mount made private");
    Ok(())
}

/// One line of `/proc/<pid>/mountinfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// Where the mount is attached.
    pub mount_point: PathBuf,
    /// Whether the mount belongs to a shared peer group.
    pub shared: bool,
}

fn read_mountinfo() -> Result<Vec<MountInfo>> {
    let content = fs::read_to_string(SELF_MOUNTINFO_FILE)
        .map_err(|e| ShareMntError::io(SELF_MOUNTINFO_FILE, e))?;
    Ok(parse_mountinfo(&content))
}

/// Parses `/proc/<pid>/mountinfo` text, in mount order.
#[must_use]
pub fn parse_mountinfo(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            let fields = line.split(' ').collect::<Vec<_>>();
            let mount_point = PathBuf::from(unescape_octal(fields.get(4)?));
            let shared = fields
                .iter()
                .skip(6)
                .take_while(|f| **f != "-")
                .any(|f| f.starts_with("shared:"));
            Some(MountInfo { mount_point, shared })
        })
        .collect()
}

/// Returns the innermost mount whose mount point contains `path`.
///
/// Later entries win on ties, since they are stacked on top.
#[must_use]
pub fn containing_mount<'a>(mounts: &'a [MountInfo], path: &Path) -> Option<&'a MountInfo> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mount_point))
        .fold(None, |best: Option<&MountInfo>, m| match best {
            Some(b) if b.mount_point.components().count() > m.mount_point.components().count() => {
                Some(b)
            }
            _ => Some(m),
        })
}

/// Decodes the `\ooo` escapes the kernel uses for whitespace and
/// backslashes in mount paths.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Sets propagation on `/` recursively.
///
/// A zero value selects slave propagation, which keeps mounts made inside
/// the namespace from leaking out.
///
/// # Errors
///
/// Returns an error if the `mount(2)` call fails.
pub fn set_root_propagation(bits: u64) -> Result<()> {
    let propagation = if bits == 0 {
        MsFlags::MS_SLAVE
    } else {
        ms_flags(bits)
    };
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        propagation | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| ShareMntError::sys("set root propagation", e))?;
    tracing::debug!(flags = propagation.bits(), "root propagation set");
    Ok(())
}

/// Applies one configured mount below `rootfs`.
///
/// Bind mounts create their target with the same kind as the source; other
/// filesystems get a directory. Read-only binds are remounted, and every
/// propagation flag is applied afterwards in order.
///
/// # Errors
///
/// Returns an error if the target cannot be created or a mount fails.
pub fn apply_mount(rootfs: &Path, spec: &MountSpec) -> Result<()> {
    let dest = in_rootfs(rootfs, &spec.destination);
    let flags = ms_flags(spec.flags);
    let data = (!spec.data.is_empty()).then_some(spec.data.as_str());

    match spec.device.as_str() {
        MountSpec::BIND => {
            prepare_bind_target(Path::new(&spec.source), &dest)?;
            mount(Some(spec.source.as_str()), &dest, None::<&str>, flags, data)
                .map_err(|e| mount_error(spec, e))?;
            if flags.contains(MsFlags::MS_RDONLY) {
                mount(
                    Some(spec.source.as_str()),
                    &dest,
                    None::<&str>,
                    flags | MsFlags::MS_REMOUNT,
                    data,
                )
                .map_err(|e| mount_error(spec, e))?;
            }
        }
        "cgroup" => {
            fs::create_dir_all(&dest).map_err(|e| ShareMntError::io(&dest, e))?;
            mount(Some(CGROUP_ROOT), &dest, None::<&str>, flags | recursive_bind(), None::<&str>)
                .map_err(|e| mount_error(spec, e))?;
        }
        device => {
            fs::create_dir_all(&dest).map_err(|e| ShareMntError::io(&dest, e))?;
            mount(Some(spec.source.as_str()), &dest, Some(device), flags, data)
                .map_err(|e| mount_error(spec, e))?;
        }
    }

    for &bits in &spec.propagation_flags {
        mount(None::<&str>, &dest, None::<&str>, ms_flags(bits), None::<&str>)
            .map_err(|e| mount_error(spec, e))?;
    }
    tracing::debug!(
        source = %spec.source,
        dest = %dest.display(),
        device = %spec.device,
        "mounted"
    );
    Ok(())
}

fn prepare_bind_target(source: &Path, dest: &Path) -> Result<()> {
    let meta = fs::metadata(source).map_err(|e| ShareMntError::io(source, e))?;
    if meta.is_dir() {
        return fs::create_dir_all(dest).map_err(|e| ShareMntError::io(dest, e));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| ShareMntError::io(parent, e))?;
    }
    if !dest.exists() {
        let _ = fs::File::create(dest).map_err(|e| ShareMntError::io(dest, e))?;
    }
    Ok(())
}

fn mount_error(spec: &MountSpec, source: nix::Error) -> ShareMntError {
    ShareMntError::sys(
        format!("mount {} on {}", spec.source, spec.destination.display()),
        source,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTINFO: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
23 22 0:21 / /proc rw,nosuid,nodev,noexec,relatime - proc proc rw
40 22 8:1 /srv/my\\040data /mnt/my\\040data rw,relatime shared:1 - ext4 /dev/sda1 rw
";

    #[test]
    fn recursive_bind_is_bind_plus_rec() {
        assert_eq!(recursive_bind().bits(), 4096 | 16384);
        assert_eq!(ms_flags(20480), recursive_bind());
        assert_eq!(flag_bits(recursive_bind()), 20480);
    }

    #[test]
    fn mountinfo_is_parsed_in_order() {
        let mounts = parse_mountinfo(MOUNTINFO);
        assert_eq!(mounts[0].mount_point, PathBuf::from("/"));
        assert!(mounts[0].shared);
        assert_eq!(mounts[1].mount_point, PathBuf::from("/proc"));
        assert!(!mounts[1].shared);
    }

    #[test]
    fn mountinfo_decodes_escaped_spaces() {
        let mounts = parse_mountinfo(MOUNTINFO);
        assert!(mounts.iter().any(|m| m.mount_point == Path::new("/mnt/my data")));
    }

    #[test]
    fn containing_mount_prefers_innermost() {
        let mounts = parse_mountinfo(MOUNTINFO);
        let found = containing_mount(&mounts, Path::new("/mnt/my data/sub")).unwrap();
        assert_eq!(found.mount_point, PathBuf::from("/mnt/my data"));
        let root = containing_mount(&mounts, Path::new("/var/lib")).unwrap();
        assert_eq!(root.mount_point, PathBuf::from("/"));
    }

    #[test]
    fn containing_mount_does_not_match_partial_components() {
        let mounts = parse_mountinfo(MOUNTINFO);
        let found = containing_mount(&mounts, Path::new("/procfs")).unwrap();
        assert_eq!(found.mount_point, PathBuf::from("/"));
    }

    #[test]
    fn unescape_leaves_plain_backslashes_alone() {
        assert_eq!(unescape_octal(r"/a\b"), r"/a\b");
        assert_eq!(unescape_octal(r"/a\134b"), r"/a\b");
    }

    #[test]
    fn bind_target_for_file_source_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("hosts");
        fs::write(&source, "127.0.0.1 localhost\n").unwrap();
        let dest = dir.path().join("rootfs/etc/hosts");

        prepare_bind_target(&source, &dest).unwrap();
        assert!(dest.is_file());
    }

    #[test]
    fn bind_target_for_dir_source_is_a_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rootfs/data");

        prepare_bind_target(dir.path(), &dest).unwrap();
        assert!(dest.is_dir());
    }
}
