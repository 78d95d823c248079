//! CPU pinning via the cgroups v1 `cpuset` controller.
//!
//! A fresh cpuset group starts with empty `cpuset.cpus` and `cpuset.mems`,
//! and the kernel refuses tasks until both are populated.

use std::path::Path;

use hutch_common::error::{HutchError, Result};

const MEMS_FILE: &str = "cpuset.mems";

/// Restricts a cgroup to the given CPU list, e.g. `0-1` or `0,2`.
///
/// When the group's `cpuset.mems` exists but is empty it is seeded from the
/// parent group.
///
/// # Errors
///
/// Returns an error if writing `cpuset.cpus` or seeding `cpuset.mems` fails.
pub fn set_cpus(cgroup_dir: &Path, cpus: &str) -> Result<()> {
    super::write_control(cgroup_dir, "cpuset.cpus", cpus)?;
    inherit_mems(cgroup_dir)?;
    tracing::debug!(cpus, "cpuset set");
    Ok(())
}

fn inherit_mems(cgroup_dir: &Path) -> Result<()> {
    let own = cgroup_dir.join(MEMS_FILE);
    let Ok(current) = std::fs::read_to_string(&own) else {
        return Ok(());
    };
    if !current.trim().is_empty() {
        return Ok(());
    }
    let Some(parent) = cgroup_dir.parent() else {
        return Ok(());
    };
    let parent_file = parent.join(MEMS_FILE);
    let mems = std::fs::read_to_string(&parent_file).map_err(|e| HutchError::Io {
        path: parent_file,
        source: e,
    })?;
    super::write_control(cgroup_dir, MEMS_FILE, mems.trim())
}
