//! CPU resource control via the cgroups v1 `cpu` controller.
//!
//! Manages the `cpu.shares` relative weight.

use std::path::Path;

use hutch_common::error::Result;

/// Sets the relative CPU weight for a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `cpu.shares` fails.
pub fn set_shares(cgroup_dir: &Path, shares: &str) -> Result<()> {
    super::write_control(cgroup_dir, "cpu.shares", shares)?;
    tracing::debug!(shares, "CPU shares set");
    Ok(())
}
