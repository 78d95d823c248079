//! Linux namespace management for container isolation.
//!
//! A container is launched with `clone(2)` into fresh UTS, PID, mount,
//! network, and IPC namespaces; `exec` later joins the same five namespaces
//! of the running container with `setns(2)`.

pub mod network;

use std::fs::File;
use std::path::PathBuf;

use hutch_common::error::{HutchError, Result};
use nix::sched::{CloneFlags, setns};

/// A namespace type a container is isolated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Hostname and domain name.
    Uts,
    /// Network stack.
    Net,
    /// Process IDs.
    Pid,
    /// Mount table.
    Mnt,
}

impl NamespaceKind {
    /// Order in which `setns` joins a container.
    ///
    /// The mount namespace comes last: once joined, `/proc` paths resolve
    /// inside the container.
    pub const ENTER_ORDER: [Self; 5] = [Self::Ipc, Self::Uts, Self::Net, Self::Pid, Self::Mnt];

    /// Name of the namespace file under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::Mnt => "mnt",
        }
    }

    /// The `CLONE_NEW*` flag creating this namespace.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Net => CloneFlags::CLONE_NEWNET,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Mnt => CloneFlags::CLONE_NEWNS,
        }
    }
}

/// Flags passed to `clone(2)` when launching a container init.
#[must_use]
pub fn container_clone_flags() -> CloneFlags {
    NamespaceKind::ENTER_ORDER
        .into_iter()
        .fold(CloneFlags::empty(), |flags, kind| flags | kind.clone_flag())
}

/// Path of a process's namespace handle.
#[must_use]
pub fn namespace_path(pid: u32, kind: NamespaceKind) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/{}", kind.proc_name()))
}

/// Opens the namespace handle of `kind` for `pid`.
///
/// # Errors
///
/// Returns an error if the process does not exist or is not accessible.
pub fn open_namespace(pid: u32, kind: NamespaceKind) -> Result<File> {
    let path = namespace_path(pid, kind);
    File::open(&path).map_err(|e| HutchError::Io { path, source: e })
}

/// Joins every namespace of `pid` in [`NamespaceKind::ENTER_ORDER`].
///
/// All handles are opened before the first `setns` so the lookups happen in
/// the caller's own mount namespace. Joining a mount namespace requires the
/// caller to be single-threaded, and joining a PID namespace only affects
/// children spawned afterwards.
///
/// # Errors
///
/// Returns an error if a handle cannot be opened or `setns(2)` fails.
pub fn enter_namespaces(pid: u32) -> Result<()> {
    let handles = NamespaceKind::ENTER_ORDER
        .into_iter()
        .map(|kind| open_namespace(pid, kind).map(|file| (kind, file)))
        .collect::<Result<Vec<_>>>()?;

    for (kind, file) in &handles {
        setns(file, kind.clone_flag()).map_err(|e| HutchError::Syscall {
            operation: "setns",
            message: format!("{} namespace of pid {pid}: {e}", kind.proc_name()),
        })?;
        tracing::debug!(pid, namespace = kind.proc_name(), "joined namespace");
    }
    Ok(())
}
