//! Unified error types for the share-mnt workspace.
//!
//! Every failure aborts the invocation at the point of detection, so the
//! variants mirror the stage in which a failure can occur rather than the
//! underlying system call.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ContainerId;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ShareMntError {
    /// No search root held an entry matching the container identity.
    #[error("no container state matching {id:?} under any of {roots:?}")]
    NotFound {
        /// Identity (container ID or hostname prefix) that was searched for.
        id: String,
        /// Search roots that were examined, in order.
        roots: Vec<PathBuf>,
    },

    /// A matching state file exists but could not be parsed.
    #[error("malformed container state at {path}: {source}")]
    StateRead {
        /// Path of the state file.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// The identity of the current container could not be derived.
    #[error("failed to find container id: {message}")]
    Identity {
        /// Description of what was inspected.
        message: String,
    },

    /// The namespace-entering helper is not on the search path.
    #[error("namespace helper {name:?} not found: {reason}")]
    HelperMissing {
        /// Program name that was looked up.
        name: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// The parent PID could not be read from a process status file.
    #[error("cannot resolve mount namespace from {path}: {message}")]
    NamespaceResolution {
        /// Status file that was read.
        path: PathBuf,
        /// Description of the parse failure.
        message: String,
    },

    /// Replacing the process image with the helper failed.
    #[error("failed to exec {program}: {source}")]
    ExecReplace {
        /// Program that was executed.
        program: PathBuf,
        /// Underlying exec error.
        source: std::io::Error,
    },

    /// The nested container configuration is unusable.
    #[error("invalid container configuration: {message}")]
    ConfigValidation {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The container engine refused to create the container.
    #[error("failed to create container {id}: {source}")]
    EngineCreate {
        /// Identity of the container that was being created.
        id: ContainerId,
        /// Engine failure.
        source: Box<ShareMntError>,
    },

    /// The container engine could not start the process.
    #[error("failed to start process in container {id}: {source}")]
    EngineStart {
        /// Identity of the container the process belongs to.
        id: ContainerId,
        /// Engine failure.
        source: Box<ShareMntError>,
    },

    /// Reading or changing process capabilities failed.
    #[error("capability error: {message}")]
    Capability {
        /// Description of the failure.
        message: String,
    },

    /// The signal relay could not be installed.
    #[error("signal relay error: {message}")]
    Relay {
        /// Description of the failure.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A system call failed.
    #[error("{op} failed: {source}")]
    Sys {
        /// Operation that was attempted.
        op: String,
        /// Underlying errno.
        source: nix::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl ShareMntError {
    /// Builds an [`ShareMntError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`ShareMntError::Sys`] for the named operation.
    pub fn sys(op: impl Into<String>, source: nix::Error) -> Self {
        Self::Sys {
            op: op.into(),
            source,
        }
    }

    /// Whether the failure was already logged where it was detected.
    ///
    /// The lifecycle runner reports engine failures with the container
    /// identity attached, so callers must not log them a second time.
    pub const fn is_reported(&self) -> bool {
        matches!(self, Self::EngineCreate { .. } | Self::EngineStart { .. })
    }

    /// Converts the error into an [`std::io::Error`], keeping the errno
    /// when one is available.
    #[must_use]
    pub fn into_io(self) -> std::io::Error {
        match self {
            Self::Io { source, .. } | Self::ExecReplace { source, .. } => source,
            Self::Sys { source, .. } => std::io::Error::from(source),
            other => std::io::Error::other(other),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ShareMntError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sys_error_keeps_errno_through_io_conversion() {
        let err = ShareMntError::sys("mount", nix::Error::EPERM).into_io();
        assert_eq!(err.raw_os_error(), Some(libc_eperm()));
    }

    #[test]
    fn engine_errors_are_reported_at_source() {
        let inner = ShareMntError::ConfigValidation {
            message: "x".into(),
        };
        let err = ShareMntError::EngineCreate {
            id: ContainerId::new("abc"),
            source: Box::new(inner),
        };
        assert!(err.is_reported());
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn not_found_is_not_reported_at_source() {
        let err = ShareMntError::NotFound {
            id: "deadbeef".into(),
            roots: vec![PathBuf::from("/run/runc")],
        };
        assert!(!err.is_reported());
    }

    const fn libc_eperm() -> i32 {
        nix::Error::EPERM as i32
    }
}
