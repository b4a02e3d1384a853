//! # sharemnt-core
//!
//! Low-level Linux primitives for share-mnt.
//!
//! This crate provides safe abstractions over:
//! - **State location**: finding a running container's `state.json`.
//! - **Namespaces**: `/proc` parsing for namespace handles, clone flags.
//! - **Filesystem**: mount propagation, mount application, device nodes.
//! - **Capabilities**: the platform capability set and bounding-set drops.
//! - **Cgroups**: cgroupfs directories for the nested container.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod cgroup;
pub mod filesystem;
pub mod locator;
pub mod namespace;
