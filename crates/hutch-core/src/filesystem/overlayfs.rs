//! Overlayfs management for the container root filesystem.
//!
//! Stacks the read-only image layer under a per-container writable layer,
//! giving copy-on-write semantics at the merged mount point.

use std::path::PathBuf;

use hutch_common::error::{HutchError, Result};
use nix::mount::{MsFlags, mount};

use super::mount::ensure_dir;

/// Configuration for an overlayfs mount.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Read-only image layer.
    pub lower_dir: PathBuf,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by overlayfs, on the same filesystem as `upper_dir`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Renders the `lowerdir=...,upperdir=...,workdir=...` mount data.
    #[must_use]
    pub fn mount_options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower_dir.display(),
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

/// Mounts an overlayfs with the given configuration.
///
/// Creates the upper, work, and merged directories if they do not exist,
/// then issues the `mount(2)` syscall with overlay-specific options.
///
/// # Errors
///
/// Returns an error if directory creation fails or if the mount syscall fails.
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    ensure_dir(&config.upper_dir)?;
    ensure_dir(&config.work_dir)?;
    ensure_dir(&config.merged_dir)?;

    let opts = config.mount_options();
    mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| HutchError::syscall("overlay mount", e))?;

    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(())
}
