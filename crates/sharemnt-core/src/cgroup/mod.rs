//! Cgroupfs resource controller for the nested container.
//!
//! Creates one cgroup per container under `share-mnt/<id>`, either in the
//! unified v2 hierarchy or in every mounted v1 controller hierarchy.

use std::path::{Path, PathBuf};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use sharemnt_common::constants::APP_NAME;
use sharemnt_common::error::{Result, ShareMntError};

/// Handle to the cgroups of a specific container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupManager {
    paths: Vec<PathBuf>,
}

impl CgroupManager {
    /// Creates the cgroups for the given container ID below `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy cannot be listed or a cgroup
    /// directory cannot be created.
    pub fn create_in(root: &Path, container_id: &str) -> Result<Self> {
        let paths = hierarchies(root)?
            .into_iter()
            .map(|h| h.join(APP_NAME).join(container_id))
            .collect::<Vec<_>>();
        for path in &paths {
            std::fs::create_dir_all(path).map_err(|e| ShareMntError::io(path, e))?;
        }
        tracing::info!(id = container_id, count = paths.len(), "cgroups created");
        Ok(Self { paths })
    }

    /// Returns the cgroup directories of this container.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Moves a process into every cgroup of this container.
    ///
    /// PID `0` refers to the calling process.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `cgroup.procs` fails.
    pub fn add_process(&self, pid: u32) -> Result<()> {
        for path in &self.paths {
            let procs = path.join("cgroup.procs");
            std::fs::write(&procs, pid.to_string()).map_err(|e| ShareMntError::io(&procs, e))?;
        }
        Ok(())
    }

    /// Returns the PIDs currently attached to any cgroup of this container.
    ///
    /// # Errors
    ///
    /// Returns an error if a `cgroup.procs` file exists but cannot be read.
    pub fn pids(&self) -> Result<Vec<i32>> {
        let mut pids = Vec::new();
        for path in &self.paths {
            let procs = path.join("cgroup.procs");
            let content = match std::fs::read_to_string(&procs) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ShareMntError::io(&procs, e)),
            };
            pids.extend(content.lines().filter_map(|line| line.trim().parse::<i32>().ok()));
        }
        pids.sort_unstable();
        pids.dedup();
        Ok(pids)
    }

    /// Sends `SIGKILL` to every process attached to this container.
    ///
    /// # Errors
    ///
    /// Returns an error if the attached PIDs cannot be listed or a live
    /// process cannot be signalled.
    pub fn kill_all(&self) -> Result<()> {
        for pid in self.pids()? {
            match kill(Pid::from_raw(pid), Signal::SIGKILL) {
                Ok(()) | Err(nix::Error::ESRCH) => {}
                Err(e) => return Err(ShareMntError::sys(format!("kill {pid}"), e)),
            }
            tracing::debug!(pid, "killed leftover process");
        }
        Ok(())
    }

    /// Removes the cgroups and releases their resources.
    ///
    /// Missing directories are ignored, so destroying twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if a cgroup directory cannot be removed, typically
    /// because a process is still attached.
    pub fn destroy(&self) -> Result<()> {
        for path in &self.paths {
            match std::fs::remove_dir(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ShareMntError::io(path, e)),
            }
        }
        tracing::info!(count = self.paths.len(), "cgroups destroyed");
        Ok(())
    }
}

/// Lists the hierarchies a container cgroup must be created in.
fn hierarchies(root: &Path) -> Result<Vec<PathBuf>> {
    if root.join("cgroup.controllers").exists() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut controllers = std::fs::read_dir(root)
        .map_err(|e| ShareMntError::io(root, e))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .map(|entry| entry.path())
        .filter(|path| path.join("cgroup.procs").exists())
        .collect::<Vec<_>>();
    controllers.sort();
    Ok(controllers)
}
