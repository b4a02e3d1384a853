//! Container lifecycle runner.
//!
//! Creates the nested container, runs one process in it until it exits,
//! and destroys the container on every path out of [`Runner::run`].

use std::io::IsTerminal;

use sharemnt_common::error::{Result, ShareMntError};
use sharemnt_core::filesystem;

use crate::backend::{Container, ContainerFactory};
use crate::nested::NestedContainer;
use crate::process::Process;
use crate::signal::SignalRelay;
use crate::tty::Console;

/// Whether the nested process gets a pseudo-terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TerminalMode {
    /// Allocate one when stdin is a terminal.
    #[default]
    Auto,
    /// Always use the caller's stdio directly.
    Never,
}

/// Runs nested containers through a container engine.
#[derive(Debug)]
pub struct Runner<F> {
    factory: F,
    terminal: TerminalMode,
}

impl<F: ContainerFactory> Runner<F> {
    /// Creates a runner using `factory`.
    pub const fn new(factory: F) -> Self {
        Self {
            factory,
            terminal: TerminalMode::Auto,
        }
    }

    /// Overrides terminal detection.
    #[must_use]
    pub const fn with_terminal(mut self, terminal: TerminalMode) -> Self {
        self.terminal = terminal;
        self
    }

    /// Returns the engine factory.
    pub const fn factory(&self) -> &F {
        &self.factory
    }

    /// Creates the container, runs its process to completion, and returns
    /// the process's exit code.
    ///
    /// # Errors
    ///
    /// Returns [`ShareMntError::ConfigValidation`] if the rootfs is
    /// missing, [`ShareMntError::Io`] if it cannot be inspected, [`ShareMntError::EngineCreate`] or
    /// [`ShareMntError::EngineStart`] if the engine fails, or any error
    /// raised while setting up the terminal or signal relay.
    pub fn run(&self, nested: NestedContainer) -> Result<i32> {
        let NestedContainer { id, config, args } = nested;
        filesystem::check_rootfs(&config.rootfs)?;
        let root_uid = config.host_root_uid()?;

        let container = self.factory.create(&id, &config).map_err(|e| {
            tracing::error!(id = %id, error = %e, "failed to create container");
            ShareMntError::EngineCreate {
                id: id.clone(),
                source: Box::new(e),
            }
        })?;
        let mut container = DestroyOnDrop(container);

        let mut process = Process::inheriting_env(args);
        let console = if self.wants_terminal() {
            let mut console = Console::open(root_uid)?;
            if let Some(slave) = console.take_slave() {
                process.set_terminal(slave);
            }
            Some(console)
        } else {
            None
        };
        let mut relay = SignalRelay::new(console)?;

        if let Err(e) = container.0.start(&mut process) {
            tracing::error!(id = %id, args = ?process.args, error = %e, "failed to start process");
            return Err(ShareMntError::EngineStart {
                id,
                source: Box::new(e),
            });
        }
        let code = relay.forward(&mut process);
        // Leftover holders of the console die with the container.
        drop(container);
        relay.close();
        code
    }

    fn wants_terminal(&self) -> bool {
        match self.terminal {
            TerminalMode::Auto => std::io::stdin().is_terminal(),
            TerminalMode::Never => false,
        }
    }
}

/// Destroys the wrapped container when dropped.
struct DestroyOnDrop(Box<dyn Container>);

impl Drop for DestroyOnDrop {
    fn drop(&mut self) {
        if let Err(e) = self.0.destroy() {
            tracing::error!(id = %self.0.id(), error = %e, "failed to destroy container");
        }
    }
}
