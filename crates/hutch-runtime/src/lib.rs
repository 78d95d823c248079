//! Container lifecycle management for the hutch runtime.
//!
//! [`engine::Engine`] drives every user-facing operation. The launcher in
//! [`process`] clones the namespaced child, which re-executes the binary
//! as [`init`]; [`exec`] re-executes it as `enter` to join a running
//! container.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod engine;
pub mod exec;
pub mod init;
pub mod logs;
pub mod process;
pub mod state;
