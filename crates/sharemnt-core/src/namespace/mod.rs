//! Linux namespace helpers.
//!
//! Resolves the mount namespace handle of a running container and maps
//! configured namespace types onto `clone(2)` flags.

use std::path::{Path, PathBuf};

use nix::sched::CloneFlags;
use sharemnt_common::error::{Result, ShareMntError};
use sharemnt_common::state::{Namespace, NamespaceType};

/// Returns the mount namespace handle for a container whose init process
/// has the given PID.
///
/// The handle belongs to the init process's *parent*: the located init is
/// wrapped by a supervisor, and the parent is the process that owns the
/// namespace the tool has to re-enter.
///
/// # Errors
///
/// Returns [`ShareMntError::NamespaceResolution`] if the status file cannot
/// be read or parsed.
pub fn mount_namespace_path(init_pid: i32) -> Result<PathBuf> {
    mount_namespace_path_in(Path::new("/proc"), init_pid)
}

/// Like [`mount_namespace_path`], reading status files below `proc_root`.
///
/// # Errors
///
/// Returns [`ShareMntError::NamespaceResolution`] if the status file cannot
/// be read or parsed.
pub fn mount_namespace_path_in(proc_root: &Path, init_pid: i32) -> Result<PathBuf> {
    let stat_path = proc_root.join(init_pid.to_string()).join("stat");
    let content =
        std::fs::read_to_string(&stat_path).map_err(|e| ShareMntError::NamespaceResolution {
            path: stat_path.clone(),
            message: e.to_string(),
        })?;
    let ppid = parse_parent_pid(&content).map_err(|message| ShareMntError::NamespaceResolution {
        path: stat_path.clone(),
        message,
    })?;
    let ns = proc_root.join(ppid.to_string()).join("ns").join("mnt");
    tracing::debug!(init_pid, ppid, ns = %ns.display(), "resolved mount namespace");
    Ok(ns)
}

/// Extracts the parent PID from a `/proc/<pid>/stat` line.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so parsing resumes after the last `)`.
///
/// # Errors
///
/// Returns a description of the problem if the line is malformed.
pub fn parse_parent_pid(stat: &str) -> std::result::Result<i32, String> {
    let (_, rest) = stat
        .rsplit_once(')')
        .ok_or_else(|| "missing command name terminator".to_string())?;
    let field = rest
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| "missing parent pid field".to_string())?;
    field
        .parse::<i32>()
        .map_err(|e| format!("invalid parent pid {field:?}: {e}"))
}

/// Maps configured namespaces to the flags passed to `unshare(2)`.
///
/// Namespaces with a join path are not part of the result.
#[must_use]
pub fn clone_flags(namespaces: &[Namespace]) -> CloneFlags {
    namespaces
        .iter()
        .filter(|ns| ns.path.as_deref().is_none_or(|p| p.as_os_str().is_empty()))
        .fold(CloneFlags::empty(), |flags, ns| flags | clone_flag(ns.kind))
}

const fn clone_flag(kind: NamespaceType) -> CloneFlags {
    match kind {
        NamespaceType::Mount => CloneFlags::CLONE_NEWNS,
        NamespaceType::Uts => CloneFlags::CLONE_NEWUTS,
        NamespaceType::Ipc => CloneFlags::CLONE_NEWIPC,
        NamespaceType::Pid => CloneFlags::CLONE_NEWPID,
        NamespaceType::Network => CloneFlags::CLONE_NEWNET,
        NamespaceType::User => CloneFlags::CLONE_NEWUSER,
        NamespaceType::Cgroup => CloneFlags::CLONE_NEWCGROUP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_pid_tolerates_spaces_in_command() {
        let stat = "1234 (my proc) S 999 1234 1234 0 -1 4194560 0 0";
        assert_eq!(parse_parent_pid(stat), Ok(999));
    }

    #[test]
    fn parent_pid_tolerates_parentheses_in_command() {
        let stat = "77 (weird) name)) R 5 77 77 0";
        assert_eq!(parse_parent_pid(stat), Ok(5));
    }

    #[test]
    fn parent_pid_rejects_truncated_lines() {
        assert!(parse_parent_pid("1234 (sh) S").is_err());
        assert!(parse_parent_pid("1234 sh S 1").is_err());
        assert!(parse_parent_pid("1234 (sh) S abc").is_err());
    }

    #[test]
    fn namespace_path_uses_parent_pid() {
        let proc_root = tempfile::tempdir().unwrap();
        let dir = proc_root.path().join("4242");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stat"), "4242 (init) S 4200 4242 4242 0\n").unwrap();

        let ns = mount_namespace_path_in(proc_root.path(), 4242).unwrap();
        assert_eq!(ns, proc_root.path().join("4200/ns/mnt"));
    }

    #[test]
    fn namespace_path_for_missing_process_is_resolution_error() {
        let proc_root = tempfile::tempdir().unwrap();
        assert!(matches!(
            mount_namespace_path_in(proc_root.path(), 1),
            Err(ShareMntError::NamespaceResolution { .. })
        ));
    }

    #[test]
    fn clone_flags_skip_joined_namespaces() {
        let namespaces = vec![
            Namespace::new(NamespaceType::Mount),
            Namespace {
                kind: NamespaceType::Network,
                path: Some(PathBuf::from("/proc/1/ns/net")),
            },
            Namespace {
                kind: NamespaceType::Uts,
                path: Some(PathBuf::new()),
            },
        ];
        assert_eq!(
            clone_flags(&namespaces),
            CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWUTS
        );
    }
}
