//! # hutch-core
//!
//! Low-level Linux isolation primitives for the hutch runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: the clone flags used to launch a container, `setns`
//!   entry for `exec`, and a scoped network-namespace switch.
//! - **Cgroups v1**: `cpu`, `cpuset`, and `memory` resource limiting.
//! - **Filesystem**: overlayfs workspaces, image layer archives, volume bind
//!   mounts, and `pivot_root`.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

#[cfg(not(target_os = "linux"))]
compile_error!("hutch-core requires Linux namespaces, cgroups, and overlayfs");

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
