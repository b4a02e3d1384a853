//! System-wide constants and default paths.

/// Application name used in cgroup paths and log output.
pub const APP_NAME: &str = "share-mnt";

/// Name of the persisted state file inside a container's state directory.
pub const STATE_FILE: &str = "state.json";

/// Name of the configuration file the native engine writes per container.
pub const CONFIG_FILE: &str = "config.json";

/// runc state directory.
pub const RUNC_RUN_DIR: &str = "/run/runc";
/// runc state directory under the legacy `/var/run` prefix.
pub const RUNC_VAR_RUN_DIR: &str = "/var/run/runc";
/// Legacy Docker native execution-driver state directory.
pub const EXECDRIVER_RUN_DIR: &str = "/var/run/docker/execdriver/native";

/// Prefix under which the host filesystem is mounted into the container.
pub const HOST_MOUNT_PREFIX: &str = "/host";

/// Search roots as seen from inside the target mount namespace, in order.
pub const NAMESPACE_SEARCH_ROOTS: [&str; 3] = [RUNC_RUN_DIR, RUNC_VAR_RUN_DIR, EXECDRIVER_RUN_DIR];

/// Search roots as seen through the host mount, in order.
pub const HOST_SEARCH_ROOTS: [&str; 3] = [
    "/host/run/runc",
    "/host/var/run/runc",
    "/host/var/run/docker/execdriver/native",
];

/// State directory of the nested container engine.
pub const ENGINE_STATE_ROOT: &str = "/var/run/share-mnt/container";

/// Cgroup filesystem mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Current process's cgroup membership file.
pub const SELF_CGROUP_FILE: &str = "/proc/self/cgroup";

/// Current process's mount table.
pub const SELF_MOUNTINFO_FILE: &str = "/proc/self/mountinfo";

/// Program used to enter the target mount namespace.
pub const NSENTER: &str = "nsenter";

/// Marker argument that selects Stage 2 on re-invocation.
pub const STAGE2_FLAG: &str = "--stage2";

/// Command run when the operator does not supply one.
pub const DEFAULT_ENTRYPOINT: &str = "/bin/sh";

/// User the nested process runs as.
pub const ROOT_USER: &str = "0:0";

/// Exit status reported when the tool fails before the nested process exits.
pub const FAILURE_EXIT_CODE: i32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_roots_mirror_namespace_roots() {
        for (host, inner) in HOST_SEARCH_ROOTS.iter().zip(NAMESPACE_SEARCH_ROOTS) {
            assert_eq!(*host, format!("{HOST_MOUNT_PREFIX}{inner}"));
        }
    }
}
