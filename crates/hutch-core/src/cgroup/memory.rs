//! Memory resource control via the cgroups v1 `memory` controller.

use std::path::Path;

use hutch_common::error::Result;

/// Sets the hard memory limit for a cgroup.
///
/// The value is written verbatim, so kernel suffixes such as `100m` work.
///
/// # Errors
///
/// Returns an error if writing to `memory.limit_in_bytes` fails.
pub fn set_limit(cgroup_dir: &Path, limit: &str) -> Result<()> {
    super::write_control(cgroup_dir, "memory.limit_in_bytes", limit)?;
    tracing::debug!(limit, "memory limit set");
    Ok(())
}
