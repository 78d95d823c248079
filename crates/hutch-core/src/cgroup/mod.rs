//! Cgroups v1 resource management.
//!
//! Each container gets a cgroup named after its ID in the `cpu`, `cpuset`,
//! and `memory` hierarchies. Hierarchy mounts are discovered from
//! `/proc/self/mountinfo` unless a fixed root is configured.

pub mod cpu;
pub mod cpuset;
pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};

use hutch_common::error::{HutchError, Result};
use hutch_common::types::ResourceConfig;

use crate::filesystem::mountinfo;

/// The fixed set of cgroup controllers hutch drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// CPU weight via `cpu.shares`.
    Cpu,
    /// CPU pinning via `cpuset.cpus`.
    Cpuset,
    /// Memory ceiling via `memory.limit_in_bytes`.
    Memory,
}

impl Subsystem {
    /// Every subsystem, in the order they are configured.
    pub const ALL: [Self; 3] = [Self::Cpu, Self::Cpuset, Self::Memory];

    /// Controller name as it appears in mount options.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cpuset => "cpuset",
            Self::Memory => "memory",
        }
    }

    /// Whether `resources` carries a limit for this subsystem.
    #[must_use]
    pub fn is_configured(self, resources: &ResourceConfig) -> bool {
        match self {
            Self::Cpu => resources.cpu_share().is_some(),
            Self::Cpuset => resources.cpu_set().is_some(),
            Self::Memory => resources.memory_limit().is_some(),
        }
    }

    /// Creates the cgroup `path` in this hierarchy and writes the configured
    /// limit, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy is missing or a write fails.
    pub fn set(self, hierarchy: &Hierarchy, path: &str, resources: &ResourceConfig) -> Result<()> {
        let dir = hierarchy.cgroup_dir(self, path, true)?;
        match self {
            Self::Cpu => resources
                .cpu_share()
                .map_or(Ok(()), |shares| cpu::set_shares(&dir, shares)),
            Self::Cpuset => resources
                .cpu_set()
                .map_or(Ok(()), |cpus| cpuset::set_cpus(&dir, cpus)),
            Self::Memory => resources
                .memory_limit()
                .map_or(Ok(()), |limit| memory::set_limit(&dir, limit)),
        }
    }

    /// Moves `pid` into the cgroup `path` of this hierarchy.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy is missing or the `tasks` write fails.
    pub fn apply(self, hierarchy: &Hierarchy, path: &str, pid: u32) -> Result<()> {
        let dir = hierarchy.cgroup_dir(self, path, true)?;
        write_control(&dir, "tasks", &pid.to_string())?;
        tracing::debug!(subsystem = self.name(), pid, "process joined cgroup");
        Ok(())
    }

    /// Deletes the cgroup `path` from this hierarchy.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy cannot be resolved or the directory
    /// cannot be removed.
    pub fn remove(self, hierarchy: &Hierarchy, path: &str) -> Result<()> {
        let dir = hierarchy.cgroup_dir(self, path, false)?;
        // cgroupfs only allows rmdir; plain directories need a recursive delete.
        let removed = std::fs::remove_dir(&dir).or_else(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Ok(()),
            _ => std::fs::remove_dir_all(&dir),
        });
        removed.map_err(|e| HutchError::Io {
            path: dir,
            source: e,
        })
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where cgroup v1 hierarchies are mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hierarchy {
    /// Look up each subsystem's mount in `/proc/self/mountinfo`.
    Discover,
    /// Treat `<root>/<subsystem>` as the hierarchy mount.
    Fixed(PathBuf),
}

impl Hierarchy {
    /// Builds a hierarchy from an optional configured root.
    #[must_use]
    pub fn from_root(root: Option<&Path>) -> Self {
        root.map_or(Self::Discover, |r| Self::Fixed(r.to_path_buf()))
    }

    /// Resolves the directory of cgroup `path` in `subsystem`'s hierarchy,
    /// creating it when `create` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy is not mounted or the directory
    /// cannot be created.
    pub fn cgroup_dir(&self, subsystem: Subsystem, path: &str, create: bool) -> Result<PathBuf> {
        let mount = match self {
            Self::Fixed(root) => root.join(subsystem.name()),
            Self::Discover => {
                let entries = mountinfo::read()?;
                mountinfo::find_cgroup_mount(&entries, subsystem.name())
                    .map(Path::to_path_buf)
                    .ok_or_else(|| HutchError::Cgroup {
                        message: format!("{subsystem} hierarchy is not mounted"),
                    })?
            }
        };
        let dir = mount.join(path);
        if create && !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| HutchError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(dir)
    }
}

/// Handle to one container's cgroups across every subsystem.
#[derive(Debug)]
pub struct CgroupManager {
    path: String,
    hierarchy: Hierarchy,
    resources: ResourceConfig,
}

impl CgroupManager {
    /// Creates a manager for cgroup `path` (the container ID).
    #[must_use]
    pub fn new(path: impl Into<String>, hierarchy: Hierarchy) -> Self {
        Self {
            path: path.into(),
            hierarchy,
            resources: ResourceConfig::default(),
        }
    }

    /// Creates the cgroup in every hierarchy and writes the configured limits.
    ///
    /// Every subsystem is attempted even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns an error naming every subsystem that could not be configured.
    pub fn set(&mut self, resources: &ResourceConfig) -> Result<()> {
        self.resources = resources.clone();
        let failures: Vec<String> = Subsystem::ALL
            .into_iter()
            .filter_map(|subsystem| {
                subsystem
                    .set(&self.hierarchy, &self.path, resources)
                    .err()
                    .map(|e| self.report(subsystem, "set", &e))
            })
            .collect();
        collect_failures(failures)
    }

    /// Moves `pid` into the cgroup of every subsystem that carries a limit.
    ///
    /// # Errors
    ///
    /// Returns an error naming every subsystem the process could not join.
    pub fn apply(&self, pid: u32) -> Result<()> {
        let failures: Vec<String> = Subsystem::ALL
            .into_iter()
            .filter(|subsystem| subsystem.is_configured(&self.resources))
            .filter_map(|subsystem| {
                subsystem
                    .apply(&self.hierarchy, &self.path, pid)
                    .err()
                    .map(|e| self.report(subsystem, "apply", &e))
            })
            .collect();
        collect_failures(failures)
    }

    /// Removes the cgroup from every hierarchy. Failures are only logged.
    pub fn destroy(&self) {
        for subsystem in Subsystem::ALL {
            match subsystem.remove(&self.hierarchy, &self.path) {
                Ok(()) => tracing::debug!(subsystem = %subsystem, path = %self.path, "cgroup removed"),
                Err(e) => {
                    let _ = self.report(subsystem, "remove", &e);
                }
            }
        }
    }

    fn report(&self, subsystem: Subsystem, action: &str, err: &HutchError) -> String {
        tracing::warn!(
            subsystem = %subsystem,
            path = %self.path,
            action,
            error = %err,
            "cgroup operation failed"
        );
        format!("{subsystem}: {err}")
    }
}

fn collect_failures(failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(HutchError::Cgroup {
            message: failures.join("; "),
        })
    }
}

/// Writes `value` to the control file `name` inside `dir`.
pub(crate) fn write_control(dir: &Path, name: &str, value: &str) -> Result<()> {
    let file = dir.join(name);
    std::fs::write(&file, value).map_err(|e| HutchError::Io {
        path: file,
        source: e,
    })
}
