//! Persisted container state and container configuration model.
//!
//! The layout follows the `state.json` written by runc/libcontainer: snake
//! case keys, mount and propagation flags as raw integers, and device types
//! as either a one-letter string or its code point. Unknown keys are ignored
//! so state written by newer engines still loads.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShareMntError};

/// Runtime state of a running container, read from its state directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    /// Host PID of the container's init process.
    pub init_process_pid: i32,
    /// Configuration the container was created from.
    pub config: ContainerConfig,
}

/// Configuration of a container, both as persisted and as handed to the
/// nested container engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Root filesystem path.
    pub rootfs: PathBuf,
    /// Device nodes created inside the rootfs, in order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<DeviceSpec>,
    /// Mounts applied under the rootfs, in order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub mounts: Vec<MountSpec>,
    /// Capabilities retained by the container process.
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    /// Propagation applied recursively to `/` in the new mount namespace.
    /// Zero selects the engine default.
    #[serde(default, rename = "rootPropagation")]
    pub root_propagation: u64,
    /// Namespaces the container process is placed in.
    #[serde(default, deserialize_with = "null_as_default")]
    pub namespaces: Vec<Namespace>,
    /// User ID mappings, only meaningful with a user namespace.
    #[serde(default, deserialize_with = "null_as_default")]
    pub uid_mappings: Vec<IdMapping>,
}

impl ContainerConfig {
    /// Returns whether the given namespace type is configured.
    #[must_use]
    pub fn has_namespace(&self, kind: NamespaceType) -> bool {
        self.namespaces.iter().any(|ns| ns.kind == kind)
    }

    /// Returns the host UID that container root maps to.
    ///
    /// Without a user namespace container root is host root.
    ///
    /// # Errors
    ///
    /// Returns [`ShareMntError::ConfigValidation`] if a user namespace is
    /// configured but no mapping covers container UID 0.
    pub fn host_root_uid(&self) -> Result<u32> {
        if !self.has_namespace(NamespaceType::User) {
            return Ok(0);
        }
        if self.uid_mappings.is_empty() {
            return Err(ShareMntError::ConfigValidation {
                message: "user namespace enabled, but no user mappings found".into(),
            });
        }
        self.uid_mappings
            .iter()
            .find_map(|m| m.host_id_for(0))
            .ok_or_else(|| ShareMntError::ConfigValidation {
                message: "user namespace enabled, but no root user mapping found".into(),
            })
    }

    /// Returns the capability names the container keeps.
    #[must_use]
    pub fn capability_names(&self) -> &[String] {
        self.capabilities.as_ref().map_or(&[], Capabilities::names)
    }

    /// Returns the rootfs path.
    #[must_use]
    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }
}

/// A single mount applied inside the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Mount source; a host path for bind mounts.
    #[serde(default)]
    pub source: String,
    /// Destination path, relative to the container rootfs.
    pub destination: PathBuf,
    /// Filesystem type, or `bind` for a bind mount.
    #[serde(default)]
    pub device: String,
    /// `mount(2)` flag bits.
    #[serde(default)]
    pub flags: u64,
    /// Propagation flag bits applied after the mount, in order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub propagation_flags: Vec<u64>,
    /// Filesystem-specific mount data.
    #[serde(default)]
    pub data: String,
}

impl MountSpec {
    /// Device string that marks a bind mount.
    pub const BIND: &'static str = "bind";

    /// Returns whether this is a bind mount.
    #[must_use]
    pub fn is_bind(&self) -> bool {
        self.device == Self::BIND
    }
}

/// A device node created inside the container rootfs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Node type.
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    /// Node path inside the container.
    pub path: PathBuf,
    /// Major number.
    #[serde(default)]
    pub major: i64,
    /// Minor number.
    #[serde(default)]
    pub minor: i64,
    /// Permission bits of the node.
    #[serde(default)]
    pub file_mode: u32,
    /// Owner UID.
    #[serde(default)]
    pub uid: u32,
    /// Owner GID.
    #[serde(default)]
    pub gid: u32,
}

/// Kind of device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDeviceKind", into = "String")]
pub enum DeviceKind {
    /// Character device (`c` or `u`).
    Char,
    /// Block device (`b`).
    Block,
    /// Named pipe (`p`).
    Fifo,
}

impl DeviceKind {
    /// Returns the one-letter code of this kind.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Char => 'c',
            Self::Block => 'b',
            Self::Fifo => 'p',
        }
    }
}

impl From<DeviceKind> for String {
    fn from(kind: DeviceKind) -> Self {
        kind.code().to_string()
    }
}

impl TryFrom<char> for DeviceKind {
    type Error = String;

    fn try_from(code: char) -> std::result::Result<Self, Self::Error> {
        match code {
            'c' | 'u' => Ok(Self::Char),
            'b' => Ok(Self::Block),
            'p' => Ok(Self::Fifo),
            other => Err(format!("unsupported device type {other:?}")),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDeviceKind {
    Text(String),
    Code(u32),
}

impl TryFrom<RawDeviceKind> for DeviceKind {
    type Error = String;

    fn try_from(raw: RawDeviceKind) -> std::result::Result<Self, Self::Error> {
        let code = match raw {
            RawDeviceKind::Text(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => return Err(format!("unsupported device type {s:?}")),
                }
            }
            RawDeviceKind::Code(n) => {
                char::from_u32(n).ok_or_else(|| format!("invalid device type code {n}"))?
            }
        };
        Self::try_from(code)
    }
}

/// Capability list, either flat or split per capability set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Capabilities {
    /// Flat list of `CAP_*` names.
    Names(Vec<String>),
    /// Per-set lists.
    Sets(CapabilitySets),
}

impl Capabilities {
    /// Returns the names bounding the container's privileges.
    #[must_use]
    pub fn names(&self) -> &[String] {
        match self {
            Self::Names(names) => names,
            Self::Sets(sets) => &sets.bounding,
        }
    }
}

/// Capability names grouped by capability set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySets {
    /// Bounding set.
    #[serde(default, alias = "Bounding", deserialize_with = "null_as_default")]
    pub bounding: Vec<String>,
    /// Effective set.
    #[serde(default, alias = "Effective", deserialize_with = "null_as_default")]
    pub effective: Vec<String>,
    /// Inheritable set.
    #[serde(default, alias = "Inheritable", deserialize_with = "null_as_default")]
    pub inheritable: Vec<String>,
    /// Permitted set.
    #[serde(default, alias = "Permitted", deserialize_with = "null_as_default")]
    pub permitted: Vec<String>,
    /// Ambient set.
    #[serde(default, alias = "Ambient", deserialize_with = "null_as_default")]
    pub ambient: Vec<String>,
}

/// A namespace the container process joins or creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace type.
    #[serde(rename = "type")]
    pub kind: NamespaceType,
    /// Existing namespace to join instead of creating one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Namespace {
    /// A namespace created fresh for the container.
    #[must_use]
    pub const fn new(kind: NamespaceType) -> Self {
        Self { kind, path: None }
    }
}

/// Kind of Linux namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamespaceType {
    /// Mount namespace.
    #[serde(rename = "NEWNS")]
    Mount,
    /// UTS namespace.
    #[serde(rename = "NEWUTS")]
    Uts,
    /// IPC namespace.
    #[serde(rename = "NEWIPC")]
    Ipc,
    /// PID namespace.
    #[serde(rename = "NEWPID")]
    Pid,
    /// Network namespace.
    #[serde(rename = "NEWNET")]
    Network,
    /// User namespace.
    #[serde(rename = "NEWUSER")]
    User,
    /// Cgroup namespace.
    #[serde(rename = "NEWCGROUP")]
    Cgroup,
}

/// A contiguous ID range mapped into a user namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    /// First ID inside the namespace.
    pub container_id: u32,
    /// First ID on the host.
    pub host_id: u32,
    /// Number of IDs in the range.
    pub size: u32,
}

impl IdMapping {
    /// Maps a container ID to its host ID, if inside this range.
    #[must_use]
    pub fn host_id_for(&self, id: u32) -> Option<u32> {
        let offset = id.checked_sub(self.container_id)?;
        (offset < self.size).then(|| self.host_id + offset)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
