//! Locates the persisted runtime state of the container this process runs in.
//!
//! Identity comes from one explicitly configured strategy: the container ID
//! embedded in the cgroup path, or the hostname used as an ID prefix. The
//! identity is then matched by prefix against the entries of each search
//! root, in order, and the first parseable `state.json` wins.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use sharemnt_common::config::IdentityStrategy;
use sharemnt_common::constants::{SELF_CGROUP_FILE, STATE_FILE};
use sharemnt_common::error::{Result, ShareMntError};
use sharemnt_common::state::ContainerState;

/// Matches systemd scope units such as `/system.slice/docker-<id>.scope`.
const SCOPE_PATTERN: &str = r"^.*/docker-([a-z0-9]+)\.scope$";

/// Resolves the current container's identity and loads its state.
#[derive(Debug, Clone)]
pub struct Locator {
    strategy: IdentityStrategy,
    cgroup_file: PathBuf,
    scope_pattern: Regex,
}

impl Locator {
    /// Creates a locator using the given identity strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope pattern fails to compile.
    pub fn new(strategy: IdentityStrategy) -> Result<Self> {
        let scope_pattern =
            Regex::new(SCOPE_PATTERN).map_err(|e| ShareMntError::ConfigValidation {
                message: format!("invalid cgroup scope pattern: {e}"),
            })?;
        Ok(Self {
            strategy,
            cgroup_file: PathBuf::from(SELF_CGROUP_FILE),
            scope_pattern,
        })
    }

    /// Reads cgroup membership from `path` instead of `/proc/self/cgroup`.
    #[must_use]
    pub fn with_cgroup_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cgroup_file = path.into();
        self
    }

    /// Resolves the identity and returns the first matching state under
    /// `roots`.
    ///
    /// # Errors
    ///
    /// Returns [`ShareMntError::Identity`] if no identity can be derived,
    /// [`ShareMntError::NotFound`] if no root holds a matching entry, and
    /// [`ShareMntError::StateRead`] if the matching state is malformed.
    pub fn locate(&self, roots: &[PathBuf]) -> Result<ContainerState> {
        let id = self.container_id()?;
        tracing::debug!(id = %id, strategy = %self.strategy, "resolved container identity");
        find_state(&id, roots)
    }

    /// Derives the identity of the current container.
    ///
    /// # Errors
    ///
    /// Returns [`ShareMntError::Identity`] if the strategy yields nothing.
    pub fn container_id(&self) -> Result<String> {
        match self.strategy {
            IdentityStrategy::Cgroup => {
                let content = fs::read_to_string(&self.cgroup_file)
                    .map_err(|e| ShareMntError::io(&self.cgroup_file, e))?;
                self.id_from_cgroup(&content)
                    .ok_or_else(|| ShareMntError::Identity {
                        message: format!("no docker cgroup in {}:\n{content}", self.cgroup_file.display()),
                    })
            }
            IdentityStrategy::Hostname => {
                let hostname = nix::unistd::gethostname()
                    .map_err(|e| ShareMntError::sys("gethostname", e))?;
                let hostname = hostname.to_string_lossy().into_owned();
                if hostname.is_empty() {
                    return Err(ShareMntError::Identity {
                        message: "hostname is empty".into(),
                    });
                }
                Ok(hostname)
            }
        }
    }

    /// Extracts a container ID from cgroup membership text.
    ///
    /// The devices controller line of a `docker/` hierarchy is preferred;
    /// systemd `docker-<id>.scope` units are tried only when no such line
    /// exists.
    #[must_use]
    pub fn id_from_cgroup(&self, content: &str) -> Option<String> {
        let from_devices = content
            .lines()
            .filter(|line| line.contains("docker/") && line.contains(":devices:"))
            .find_map(|line| line.rsplit('/').next().filter(|id| !id.is_empty()));
        if let Some(id) = from_devices {
            return Some(id.to_string());
        }

        content.lines().find_map(|line| {
            self.scope_pattern
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
    }
}

/// Returns the state of the first entry under `roots` whose name starts
/// with `id`.
///
/// Roots that cannot be listed are skipped, as are matching entries without
/// a readable state file.
///
/// # Errors
///
/// Returns [`ShareMntError::NotFound`] if nothing matches and
/// [`ShareMntError::StateRead`] if a matching state file is malformed.
pub fn find_state(id: &str, roots: &[PathBuf]) -> Result<ContainerState> {
    for root in roots {
        let Some(entries) = sorted_entries(root) else {
            tracing::debug!(root = %root.display(), "state root not readable, skipping");
            continue;
        };

        for name in entries.iter().filter(|name| name.starts_with(id)) {
            let path = root.join(name).join(STATE_FILE);
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "state file not readable");
                    continue;
                }
            };
            let state = serde_json::from_slice::<ContainerState>(&bytes)
                .map_err(|source| ShareMntError::StateRead {
                    path: path.clone(),
                    source,
                })?;
            tracing::info!(path = %path.display(), pid = state.init_process_pid, "found container state");
            return Ok(state);
        }
    }

    Err(ShareMntError::NotFound {
        id: id.to_string(),
        roots: roots.to_vec(),
    })
}

fn sorted_entries(root: &Path) -> Option<Vec<String>> {
    let mut names = fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    Some(names)
}
