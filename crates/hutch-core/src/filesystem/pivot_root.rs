//! Root filesystem switching via `pivot_root(2)`.
//!
//! Unlike `chroot`, this changes the root mount itself, so once the old
//! root is detached the host filesystem is no longer reachable.

use std::path::Path;

use hutch_common::error::{HutchError, Result};
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::unistd::chdir;

use super::mount::ensure_dir;

/// Hidden directory under the new root that temporarily holds the old root.
const PUT_OLD: &str = ".pivot_root";

/// Makes `new_root` the root filesystem of the calling mount namespace.
///
/// `new_root` is bind-mounted onto itself (pivot_root requires a mount
/// point), the old root is moved under [`PUT_OLD`], the working directory
/// changes to `/`, and the old root is detached and its directory removed.
///
/// # Errors
///
/// Returns an error if any mount, `pivot_root(2)`, or cleanup step fails.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    mount(
        Some(new_root),
        new_root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| HutchError::syscall("bind mount new root", e))?;

    let put_old = new_root.join(PUT_OLD);
    ensure_dir(&put_old)?;

    nix::unistd::pivot_root(new_root, &put_old)
        .map_err(|e| HutchError::syscall("pivot_root", e))?;
    chdir("/").map_err(|e| HutchError::syscall("chdir /", e))?;

    let old_root = Path::new("/").join(PUT_OLD);
    umount2(&old_root, MntFlags::MNT_DETACH)
        .map_err(|e| HutchError::syscall("detach old root", e))?;
    std::fs::remove_dir(&old_root).map_err(|e| HutchError::Io {
        path: old_root.clone(),
        source: e,
    })?;

    tracing::info!(new_root = %new_root.display(), "pivot_root complete");
    Ok(())
}
