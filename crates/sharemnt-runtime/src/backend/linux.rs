//! Native Linux container engine.
//!
//! Keeps one state directory per container below a fixed root and a
//! cgroupfs cgroup per container. The container process is set up in the
//! child between fork and exec: it joins the cgroups, unshares the
//! configured namespaces, applies the mounts and devices under the rootfs,
//! chroots into it, and trims its bounding capabilities.

use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::mount::MsFlags;
use nix::unistd::{chdir, chroot, setsid};
use sharemnt_common::constants::{CGROUP_ROOT, CONFIG_FILE, STATE_FILE};
use sharemnt_common::error::{Result, ShareMntError};
use sharemnt_common::state::{ContainerConfig, ContainerState, NamespaceType};
use sharemnt_common::types::ContainerId;
use sharemnt_core::capability;
use sharemnt_core::cgroup::CgroupManager;
use sharemnt_core::filesystem::{self, device, mount};
use sharemnt_core::namespace;

use super::{Container, ContainerFactory};
use crate::process::Process;

/// How long teardown waits for killed processes to leave the cgroup.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Factory for containers run directly on the Linux kernel.
#[derive(Debug, Clone)]
pub struct LinuxFactory {
    root: PathBuf,
    cgroup_root: PathBuf,
    default_entrypoint: Vec<String>,
}

impl LinuxFactory {
    /// Creates a factory keeping container state below `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state root cannot be created.
    pub fn new(root: impl Into<PathBuf>, default_entrypoint: Vec<String>) -> Result<Self> {
        let root = root.into();
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&root)
            .map_err(|e| ShareMntError::io(&root, e))?;
        Ok(Self {
            root,
            cgroup_root: PathBuf::from(CGROUP_ROOT),
            default_entrypoint,
        })
    }

    /// Places container cgroups below `path` instead of `/sys/fs/cgroup`.
    #[must_use]
    pub fn with_cgroup_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.cgroup_root = path.into();
        self
    }

    /// Returns the state root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ContainerFactory for LinuxFactory {
    fn create(&self, id: &ContainerId, config: &ContainerConfig) -> Result<Box<dyn Container>> {
        filesystem::check_rootfs(&config.rootfs)?;
        let state_dir = self.root.join(id.as_str());
        if state_dir.exists() {
            return Err(ShareMntError::ConfigValidation {
                message: format!("container {id} already exists"),
            });
        }
        DirBuilder::new()
            .mode(0o711)
            .create(&state_dir)
            .map_err(|e| ShareMntError::io(&state_dir, e))?;

        let cgroup = match write_config(&state_dir, config)
            .and_then(|()| CgroupManager::create_in(&self.cgroup_root, id.as_str()))
        {
            Ok(cgroup) => cgroup,
            Err(e) => {
                let _ = fs::remove_dir_all(&state_dir);
                return Err(e);
            }
        };

        tracing::info!(id = %id, rootfs = %config.rootfs.display(), "container created");
        Ok(Box::new(LinuxContainer {
            id: id.clone(),
            config: config.clone(),
            state_dir,
            cgroup,
            default_entrypoint: self.default_entrypoint.clone(),
            destroyed: false,
        }))
    }
}

fn write_config(state_dir: &Path, config: &ContainerConfig) -> Result<()> {
    let path = state_dir.join(CONFIG_FILE);
    let bytes = serde_json::to_vec_pretty(config)?;
    fs::write(&path, bytes).map_err(|e| ShareMntError::io(&path, e))
}

/// A container created by [`LinuxFactory`].
#[derive(Debug)]
pub struct LinuxContainer {
    id: ContainerId,
    config: ContainerConfig,
    state_dir: PathBuf,
    cgroup: CgroupManager,
    default_entrypoint: Vec<String>,
    destroyed: bool,
}

impl LinuxContainer {
    fn write_state(&self, pid: u32) -> Result<()> {
        let state = ContainerState {
            init_process_pid: i32::try_from(pid).unwrap_or(i32::MAX),
            config: self.config.clone(),
        };
        let path = self.state_dir.join(STATE_FILE);
        let bytes = serde_json::to_vec(&state)?;
        fs::write(&path, bytes).map_err(|e| ShareMntError::io(&path, e))
    }

    fn drain(&self) -> Result<()> {
        self.cgroup.kill_all()?;
        let mut waited = Duration::ZERO;
        while waited < DRAIN_TIMEOUT && !self.cgroup.pids()?.is_empty() {
            std::thread::sleep(DRAIN_POLL);
            waited += DRAIN_POLL;
        }
        Ok(())
    }
}

impl Container for LinuxContainer {
    fn id(&self) -> &ContainerId {
        &self.id
    }

    fn start(&mut self, process: &mut Process) -> Result<()> {
        let (uid, gid) = process.user_ids()?;
        let init = ChildInit {
            config: self.config.clone(),
            cgroup: self.cgroup.clone(),
            controlling_terminal: process.has_terminal(),
        };
        let mut cmd = process.command(&self.default_entrypoint)?;
        let _ = cmd.uid(uid).gid(gid);
        // SAFETY: the closure runs in the forked child before exec. The
        // caller spawns no threads before the child exists, so the
        // allocations and file writes done during setup cannot deadlock on
        // locks held by other threads.
        unsafe {
            let _ = cmd.pre_exec(move || init.run().map_err(ShareMntError::into_io));
        }

        let child = cmd
            .spawn()
            .map_err(|e| ShareMntError::io(cmd.get_program(), e))?;
        let pid = child.id();
        process.attach(child);
        self.write_state(pid)?;
        tracing::info!(id = %self.id, pid, "process started");
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.drain()?;
        self.cgroup.destroy()?;
        match fs::remove_dir_all(&self.state_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ShareMntError::io(&self.state_dir, e)),
        }
        self.destroyed = true;
        tracing::info!(id = %self.id, "container destroyed");
        Ok(())
    }
}

/// Setup performed in the container process between fork and exec.
struct ChildInit {
    config: ContainerConfig,
    cgroup: CgroupManager,
    controlling_terminal: bool,
}

impl ChildInit {
    fn run(&self) -> Result<()> {
        self.cgroup.add_process(0)?;
        if self.controlling_terminal {
            let _ = setsid().map_err(|e| ShareMntError::sys("setsid", e))?;
            // SAFETY: fd 0 is the pseudo-terminal slave installed as stdin.
            if unsafe { libc::ioctl(0, libc::TIOCSCTTY, 0) } < 0 {
                return Err(ShareMntError::io("/dev/tty", std::io::Error::last_os_error()));
            }
        }

        nix::sched::unshare(namespace::clone_flags(&self.config.namespaces))
            .map_err(|e| ShareMntError::sys("unshare", e))?;

        let rootfs = self.config.rootfs();
        if self.config.has_namespace(NamespaceType::Mount) {
            mount::set_root_propagation(self.config.root_propagation)?;
            mount::make_parent_private(rootfs)?;
            mount::bind_onto_itself(rootfs, MsFlags::MS_BIND | MsFlags::MS_REC)?;
        }
        for spec in &self.config.mounts {
            mount::apply_mount(rootfs, spec)?;
        }
        for dev in &self.config.devices {
            device::create_device(rootfs, dev)?;
        }

        chroot(rootfs).map_err(|e| ShareMntError::sys(format!("chroot {}", rootfs.display()), e))?;
        chdir("/").map_err(|e| ShareMntError::sys("chdir /", e))?;
        capability::restrict_bounding(self.config.capability_names())
    }
}
