//! Container engine abstraction.
//!
//! The lifecycle runner drives containers only through these traits, so an
//! engine can be swapped without touching namespace or mount logic.

pub mod linux;

use sharemnt_common::error::Result;
use sharemnt_common::state::ContainerConfig;
use sharemnt_common::types::ContainerId;

use crate::process::Process;

/// Creates containers from a resolved configuration.
pub trait ContainerFactory {
    /// Creates a container scoped by `id` and `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be created.
    fn create(&self, id: &ContainerId, config: &ContainerConfig) -> Result<Box<dyn Container>>;
}

/// A created container.
pub trait Container {
    /// Returns the container's identity.
    fn id(&self) -> &ContainerId;

    /// Starts `process` inside the container.
    ///
    /// On success the spawned child is attached to `process`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    fn start(&mut self, process: &mut Process) -> Result<()>;

    /// Tears the container down, releasing every resource the engine
    /// allocated for it. Destroying twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource cannot be released.
    fn destroy(&mut self) -> Result<()>;
}
