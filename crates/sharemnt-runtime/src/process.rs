//! Process descriptor for the command run inside the nested container.

use std::ffi::OsString;
use std::os::fd::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};

use sharemnt_common::constants::ROOT_USER;
use sharemnt_common::error::{Result, ShareMntError};

/// A process to run inside a container.
///
/// Built fresh for each run; once started it owns the spawned child until
/// it has been waited for.
#[derive(Debug)]
pub struct Process {
    /// Command and arguments. Empty selects the engine's default entrypoint.
    pub args: Vec<String>,
    /// Environment, in order.
    pub env: Vec<(OsString, OsString)>,
    /// `uid:gid` the process runs as.
    pub user: String,
    terminal: Option<OwnedFd>,
    child: Option<Child>,
}

impl Process {
    /// Creates a process with the given arguments and environment, running
    /// as root with the caller's stdio.
    #[must_use]
    pub fn new(args: Vec<String>, env: Vec<(OsString, OsString)>) -> Self {
        Self {
            args,
            env,
            user: ROOT_USER.to_string(),
            terminal: None,
            child: None,
        }
    }

    /// Creates a process that inherits the full environment of the caller.
    #[must_use]
    pub fn inheriting_env(args: Vec<String>) -> Self {
        Self::new(args, std::env::vars_os().collect())
    }

    /// Attaches the slave end of a pseudo-terminal as the process's stdio.
    pub fn set_terminal(&mut self, slave: OwnedFd) {
        self.terminal = Some(slave);
    }

    /// Returns whether the process runs on a pseudo-terminal.
    pub const fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Parses [`Process::user`] into a UID and GID.
    ///
    /// # Errors
    ///
    /// Returns [`ShareMntError::ConfigValidation`] if the user is not of the
    /// form `uid:gid`.
    pub fn user_ids(&self) -> Result<(u32, u32)> {
        let invalid = || ShareMntError::ConfigValidation {
            message: format!("invalid process user {:?}, expected uid:gid", self.user),
        };
        let (uid, gid) = self.user.split_once(':').ok_or_else(invalid)?;
        Ok((
            uid.parse().map_err(|_| invalid())?,
            gid.parse().map_err(|_| invalid())?,
        ))
    }

    /// Builds the command that execs this process.
    ///
    /// The environment is replaced wholesale; stdio goes to the terminal if
    /// one is attached and is inherited otherwise. `fallback` is used when
    /// no arguments were given.
    ///
    /// # Errors
    ///
    /// Returns an error if there is nothing to run or the terminal cannot
    /// be duplicated.
    pub fn command(&mut self, fallback: &[String]) -> Result<Command> {
        let argv = if self.args.is_empty() {
            fallback
        } else {
            &self.args
        };
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| ShareMntError::ConfigValidation {
                message: "no command to run and no default entrypoint".into(),
            })?;

        let mut cmd = Command::new(program);
        let _ = cmd
            .args(rest)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k, v)));

        if let Some(slave) = self.terminal.take() {
            let stdin = slave.try_clone().map_err(|e| ShareMntError::io("/dev/ptmx", e))?;
            let stdout = slave.try_clone().map_err(|e| ShareMntError::io("/dev/ptmx", e))?;
            let _ = cmd
                .stdin(Stdio::from(stdin))
                .stdout(Stdio::from(stdout))
                .stderr(Stdio::from(slave));
        }
        Ok(cmd)
    }

    /// Records the spawned child of this process.
    pub fn attach(&mut self, child: Child) {
        self.child = Some(child);
    }

    /// Returns the host PID once started.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Blocks until the process exits and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the process was never started or waiting fails.
    pub fn wait(&mut self) -> Result<i32> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| ShareMntError::ConfigValidation {
                message: "process has not been started".into(),
            })?;
        let pid = child.id();
        let status = child
            .wait()
            .map_err(|e| ShareMntError::io(format!("/proc/{pid}"), e))?;
        tracing::info!(pid, %status, "process exited");
        Ok(exit_code(status))
    }
}

/// Maps an exit status to a shell-style exit code; death by signal `n`
/// yields `128 + n`.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or_default())
}
