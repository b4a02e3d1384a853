//! Stage orchestration for share-mnt.
//!
//! Stage 1 ([`launcher`]) re-enters this program inside the target
//! container's mount namespace. Stage 2 ([`nested`]) assembles a nested
//! container sharing the requested paths, and [`runner`] runs it through a
//! [`backend`] engine.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod launcher;
pub mod nested;
pub mod process;
pub mod runner;
pub mod signal;
pub mod tty;
