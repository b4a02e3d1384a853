//! # sharemnt-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the share-mnt workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and holds the persisted container state model that both
//! stages read.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod state;
pub mod types;
