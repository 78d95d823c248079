//! Filesystem management for container isolation.
//!
//! Provides the overlayfs-backed container workspace, image layer archives,
//! `pivot_root` for switching the root filesystem, and mount utilities.

pub mod layer;
pub mod mount;
pub mod mountinfo;
pub mod overlayfs;
pub mod pivot_root;
pub mod workspace;
