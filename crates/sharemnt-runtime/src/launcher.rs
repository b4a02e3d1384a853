//! Namespace entry (stage 1).
//!
//! Replaces the current process with the namespace-entering helper, which
//! joins the target container's mount namespace and runs this executable
//! again from inside the target's rootfs in stage 2.

use std::convert::Infallible;
use std::ffi::{OsStr, OsString};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use sharemnt_common::constants::STAGE2_FLAG;
use sharemnt_common::error::{Result, ShareMntError};
use sharemnt_common::state::ContainerState;
use sharemnt_core::namespace;

/// Builds the helper arguments that enter `namespace` and run `self_exe`
/// from inside `rootfs` in stage 2, followed by `forwarded` unchanged.
#[must_use]
pub fn entry_args(
    namespace: &Path,
    rootfs: &Path,
    self_exe: &Path,
    forwarded: impl IntoIterator<Item = OsString>,
) -> Vec<OsString> {
    let mut mount = OsString::from("--mount=");
    mount.push(namespace);

    let relative = self_exe
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect::<PathBuf>();

    let mut args = vec![
        mount,
        OsString::from("-F"),
        OsString::from("--"),
        rootfs.join(relative).into_os_string(),
        OsString::from(STAGE2_FLAG),
    ];
    args.extend(forwarded);
    args
}

/// Execs `helper` to re-enter this program inside the mount namespace of
/// the container described by `state`.
///
/// `argv` is this process's full argument vector; its first element names
/// this executable and the rest is forwarded verbatim. Never returns on
/// success.
///
/// # Errors
///
/// Returns [`ShareMntError::NamespaceResolution`] if the namespace cannot
/// be resolved, [`ShareMntError::HelperMissing`] if `helper` is not on the
/// search path, or [`ShareMntError::ExecReplace`] if the exec fails.
pub fn enter(state: &ContainerState, helper: &str, argv: Vec<OsString>) -> Result<Infallible> {
    let namespace = namespace::mount_namespace_path(state.init_process_pid)?;

    let mut argv = argv.into_iter();
    let argv0 = argv.next().unwrap_or_default();
    let self_exe = self_path(std::env::current_exe(), &argv0)?;

    let program = which::which(helper).map_err(|e| ShareMntError::HelperMissing {
        name: helper.to_string(),
        reason: e.to_string(),
    })?;
    let args = entry_args(&namespace, state.config.rootfs(), &self_exe, argv);

    tracing::info!(
        helper = %program.display(),
        namespace = %namespace.display(),
        args = ?args,
        "entering container mount namespace"
    );
    let source = Command::new(&program).args(&args).exec();
    Err(ShareMntError::ExecReplace { program, source })
}

/// Picks this executable's absolute path: the kernel's answer when there
/// is one, otherwise `argv0` made absolute.
fn self_path(current: io::Result<PathBuf>, argv0: &OsStr) -> Result<PathBuf> {
    match current {
        Ok(path) => Ok(path),
        Err(e) if argv0.is_empty() => Err(ShareMntError::io("/proc/self/exe", e)),
        Err(e) => {
            tracing::debug!(error = %e, "falling back to argv[0] for own path");
            std::path::absolute(argv0).map_err(|e| ShareMntError::io(argv0, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use sharemnt_common::state::ContainerConfig;

    use super::*;

    #[test]
    fn own_path_ignores_bare_program_name() {
        let exe = std::env::current_exe().unwrap();
        let path = self_path(std::env::current_exe(), OsStr::new("share-mnt")).unwrap();
        assert_eq!(path, exe);
    }

    #[test]
    fn own_path_falls_back_to_argv0() {
        let unavailable = Err(io::Error::from(io::ErrorKind::NotFound));
        let path = self_path(unavailable, OsStr::new("/usr/local/bin/share-mnt")).unwrap();
        assert_eq!(path, PathBuf::from("/usr/local/bin/share-mnt"));
    }

    #[test]
    fn own_path_without_any_source_fails() {
        let unavailable = Err(io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(
            self_path(unavailable, OsStr::new("")),
            Err(ShareMntError::Io { .. })
        ));
    }

    #[test]
    fn enter_without_helper_reports_it_missing() {
        let state = ContainerState {
            init_process_pid: i32::try_from(std::process::id()).unwrap(),
            config: ContainerConfig::default(),
        };
        let argv = vec![OsString::from("share-mnt"), OsString::from("/data")];
        let result = enter(&state, "share-mnt-no-such-helper", argv);
        assert!(matches!(
            result,
            Err(ShareMntError::HelperMissing { ref name, .. }) if name == "share-mnt-no-such-helper"
        ));
    }

    #[test]
    fn entry_args_place_self_inside_rootfs() {
        let args = entry_args(
            Path::new("/proc/999/ns/mnt"),
            Path::new("/var/lib/docker/overlay2/abc/merged"),
            Path::new("/usr/local/bin/share-mnt"),
            ["/data", "--", "echo", "hi"].map(OsString::from),
        );
        assert_eq!(
            args,
            [
                "--mount=/proc/999/ns/mnt",
                "-F",
                "--",
                "/var/lib/docker/overlay2/abc/merged/usr/local/bin/share-mnt",
                "--stage2",
                "/data",
                "--",
                "echo",
                "hi",
            ]
            .map(OsString::from)
        );
    }

    #[test]
    fn entry_args_without_forwarded_arguments() {
        let args = entry_args(
            Path::new("/proc/1/ns/mnt"),
            Path::new("/"),
            Path::new("/share-mnt"),
            Vec::new(),
        );
        assert_eq!(args.len(), 5);
        assert_eq!(args[3], OsString::from("/share-mnt"));
        assert_eq!(args[4], OsString::from(STAGE2_FLAG));
    }
}
