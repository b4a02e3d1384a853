//! Domain primitive types used across the share-mnt workspace.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Characters a generated container identity is drawn from.
const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generator for nested container identities.
///
/// Seeded once at startup and handed around by `&mut` reference. Identities
/// are not checked for uniqueness; twelve characters over a 36-symbol
/// alphabet are treated as collision-free for the lifetime of a run.
#[derive(Debug)]
pub struct IdGenerator {
    rng: StdRng,
}

impl IdGenerator {
    /// Length of every generated identity.
    pub const LEN: usize = 12;

    /// Creates a generator seeded from the operating system.
    #[must_use]
    pub fn from_os() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Creates a generator with a fixed seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns a fresh lowercase-alphanumeric identity.
    pub fn generate(&mut self) -> ContainerId {
        let id = (0..Self::LEN)
            .map(|_| char::from(ID_CHARSET[self.rng.random_range(0..ID_CHARSET.len())]))
            .collect::<String>();
        ContainerId(id)
    }
}
