//! Configuration model for share-mnt.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants;

/// How the current container's identity is discovered.
///
/// The strategies belong to different deployment generations and are never
/// combined: exactly one is active per invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStrategy {
    /// Parse the container ID out of `/proc/self/cgroup`.
    #[default]
    Cgroup,
    /// Use the hostname as a container ID prefix.
    Hostname,
}

impl fmt::Display for IdentityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cgroup => write!(f, "cgroup"),
            Self::Hostname => write!(f, "hostname"),
        }
    }
}

impl FromStr for IdentityStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cgroup" => Ok(Self::Cgroup),
            "hostname" => Ok(Self::Hostname),
            other => Err(format!(
                "unknown identity strategy {other:?} (expected cgroup or hostname)"
            )),
        }
    }
}

/// Root configuration for share-mnt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareMntConfig {
    /// Identity discovery strategy.
    pub identity: IdentityStrategy,
    /// State roots searched from outside the target namespace (Stage 1).
    pub host_search_roots: Vec<PathBuf>,
    /// State roots searched from inside the target namespace (Stage 2).
    pub namespace_search_roots: Vec<PathBuf>,
    /// State directory of the nested container engine.
    pub engine_root: PathBuf,
    /// Program used to enter the target mount namespace.
    pub nsenter: String,
    /// Command run in the nested container when none is given.
    pub default_entrypoint: Vec<String>,
}

impl Default for ShareMntConfig {
    fn default() -> Self {
        Self {
            identity: IdentityStrategy::default(),
            host_search_roots: constants::HOST_SEARCH_ROOTS.iter().map(PathBuf::from).collect(),
            namespace_search_roots: constants::NAMESPACE_SEARCH_ROOTS
                .iter()
                .map(PathBuf::from)
                .collect(),
            engine_root: PathBuf::from(constants::ENGINE_STATE_ROOT),
            nsenter: constants::NSENTER.to_string(),
            default_entrypoint: vec![constants::DEFAULT_ENTRYPOINT.to_string()],
        }
    }
}
