//! Mount utilities for container filesystem setup.
//!
//! Handles mount propagation, the `/proc` and `/dev` mounts performed by
//! the container init, volume bind mounts, and the retrying unmount used
//! during teardown.

use std::path::Path;
use std::thread;

use hutch_common::constants::{UNMOUNT_RETRIES, UNMOUNT_RETRY_DELAY};
use hutch_common::error::{HutchError, Result};
use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags, mount, umount2};

/// Marks every mount under `/` as private so mount events do not propagate
/// back to the host namespace.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn make_root_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| HutchError::syscall("make / private", e))?;
    tracing::debug!("root mount propagation set to private");
    Ok(())
}

/// Mounts a fresh `/proc` for the current PID namespace.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
pub fn mount_proc() -> Result<()> {
    ensure_dir(Path::new("/proc"))?;
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| HutchError::syscall("mount /proc", e))?;
    tracing::debug!("/proc mounted");
    Ok(())
}

/// Mounts a tmpfs over `/dev`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
pub fn mount_dev() -> Result<()> {
    ensure_dir(Path::new("/dev"))?;
    mount(
        Some("tmpfs"),
        "/dev",
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| HutchError::syscall("mount /dev", e))?;
    tracing::debug!("/dev mounted");
    Ok(())
}

/// Creates a recursive bind mount from source to target.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| HutchError::syscall("bind mount", e))?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "bind mount created"
    );
    Ok(())
}

/// Unmounts `target`, retrying while the kernel reports it busy.
///
/// A target that is not mounted or does not exist counts as success. When
/// every attempt fails with `EBUSY` the mount is lazily detached.
///
/// # Errors
///
/// Returns an error if the unmount fails for any other reason.
pub fn unmount(target: &Path) -> Result<()> {
    for attempt in 1..=UNMOUNT_RETRIES {
        match umount2(target, MntFlags::empty()) {
            Ok(()) => {
                tracing::debug!(path = %target.display(), attempt, "unmounted");
                return Ok(());
            }
            Err(Errno::EINVAL | Errno::ENOENT) => return Ok(()),
            Err(Errno::EBUSY) => thread::sleep(UNMOUNT_RETRY_DELAY),
            Err(e) => return Err(HutchError::syscall("umount", e)),
        }
    }
    tracing::warn!(path = %target.display(), "mount still busy, detaching lazily");
    match umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) | Err(Errno::EINVAL | Errno::ENOENT) => Ok(()),
        Err(e) => Err(HutchError::syscall("umount", e)),
    }
}

/// Removes a directory tree, retrying while it is transiently busy.
///
/// A missing path counts as success. A file or symlink in its place is
/// removed without following it.
///
/// # Errors
///
/// Returns the last removal error once all attempts are exhausted.
pub fn remove_dir_retrying(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if !meta.is_dir() => {
            return std::fs::remove_file(path).map_err(|e| HutchError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        _ => {}
    }
    let mut last_error = None;
    for _ in 0..UNMOUNT_RETRIES {
        match std::fs::remove_dir_all(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
                last_error = Some(e);
                thread::sleep(UNMOUNT_RETRY_DELAY);
            }
            Err(e) => {
                return Err(HutchError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }
    }
    Err(HutchError::Io {
        path: path.to_path_buf(),
        source: last_error.unwrap_or_else(|| std::io::Error::from_raw_os_error(libc::EBUSY)),
    })
}

/// Creates a directory and its parents.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| HutchError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmount_missing_target_is_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        unmount(&dir.path().join("never-mounted")).expect("missing target is fine");
    }

    #[test]
    fn remove_dir_retrying_removes_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tree = dir.path().join("layer");
        std::fs::create_dir_all(tree.join("etc")).unwrap();
        std::fs::write(tree.join("etc/hostname"), "box").unwrap();

        remove_dir_retrying(&tree).expect("remove");
        assert!(!tree.exists());
        remove_dir_retrying(&tree).expect("second removal is a no-op");
    }

    #[test]
    fn non_directory_in_place_of_a_tree_is_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("writelayer");
        std::fs::write(dir.path().join("keep"), "data").unwrap();
        std::fs::write(&target, "stale").unwrap();
        remove_dir_retrying(&target).expect("remove file");
        assert!(!target.exists());

        std::os::unix::fs::symlink(dir.path().join("keep"), &target).unwrap();
        remove_dir_retrying(&target).expect("remove symlink");
        assert!(std::fs::symlink_metadata(&target).is_err());
        assert!(dir.path().join("keep").exists());
    }
}
