//! The container filesystem workspace.
//!
//! A workspace is the image's read-only layer, a per-container write layer,
//! and their overlay union at the container's mount point, plus an optional
//! host directory bind-mounted into the container.

use std::path::{Component, Path, PathBuf};

use hutch_common::config::HutchConfig;
use hutch_common::error::{HutchError, Result};

use super::layer;
use super::mount::{self, bind_mount, ensure_dir};
use super::mountinfo;
use super::overlayfs::{OverlayConfig, mount_overlay};

/// A `hostPath:containerPath` volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Directory on the host.
    pub host_path: PathBuf,
    /// Location inside the container root.
    pub container_path: PathBuf,
}

impl VolumeSpec {
    /// Parses a volume spec, accepting exactly two non-empty segments.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        match parts.as_slice() {
            [host, container] if !host.is_empty() && !container.is_empty() => Some(Self {
                host_path: PathBuf::from(host),
                container_path: PathBuf::from(container),
            }),
            _ => None,
        }
    }
}

/// On-disk layout of one container's root filesystem.
#[derive(Debug, Clone)]
pub struct Workspace {
    image_archive: PathBuf,
    overlay: OverlayConfig,
    volume: Option<VolumeSpec>,
}

impl Workspace {
    /// Describes the workspace of container `name` built from `image`.
    ///
    /// An unparsable volume spec is dropped with a warning.
    #[must_use]
    pub fn new(config: &HutchConfig, name: &str, image: &str, volume: Option<&str>) -> Self {
        let volume = volume.filter(|v| !v.is_empty()).and_then(|spec| {
            let parsed = VolumeSpec::parse(spec);
            if parsed.is_none() {
                tracing::warn!(volume = spec, "ignoring malformed volume spec");
            }
            parsed
        });
        Self {
            image_archive: config.image_archive(image),
            overlay: OverlayConfig {
                lower_dir: config.image_layer(image),
                upper_dir: config.write_layer(name),
                work_dir: config.work_dir(name),
                merged_dir: config.mount_point(name),
            },
            volume,
        }
    }

    /// Merged root filesystem the container pivots into.
    #[must_use]
    pub fn mount_point(&self) -> &Path {
        &self.overlay.merged_dir
    }

    /// Writable layer holding the container's changes.
    #[must_use]
    pub fn write_layer(&self) -> &Path {
        &self.overlay.upper_dir
    }

    /// The honored volume, if any.
    #[must_use]
    pub const fn volume(&self) -> Option<&VolumeSpec> {
        self.volume.as_ref()
    }

    /// Builds the workspace: extracts the image if needed, recreates an empty
    /// write layer, mounts the overlay, and bind-mounts the volume.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction, directory setup, or any mount fails.
    pub fn build(&self) -> Result<()> {
        let _ = layer::ensure_layer(&self.image_archive, &self.overlay.lower_dir)?;

        for dir in [&self.overlay.upper_dir, &self.overlay.work_dir] {
            mount::remove_dir_retrying(dir)?;
            ensure_dir(dir)?;
        }
        mount_overlay(&self.overlay)?;

        if let Some(volume) = &self.volume {
            ensure_dir(&volume.host_path)?;
            let target = self.volume_target(volume)?;
            ensure_dir(&target)?;
            bind_mount(&volume.host_path, &target)?;
        }

        tracing::info!(mount_point = %self.mount_point().display(), "workspace built");
        Ok(())
    }

    /// Unmounts and deletes everything [`Workspace::build`] created except
    /// the shared image layer. Safe to call repeatedly.
    ///
    /// Every step is attempted even after an earlier one fails, except that
    /// the directories are kept while the mount point is still mounted.
    ///
    /// # Errors
    ///
    /// Returns the first unmount or directory removal error.
    pub fn teardown(&self) -> Result<()> {
        let mut first_error = None;
        if let Some(volume) = &self.volume {
            let unmounted = self
                .volume_target(volume)
                .and_then(|target| unmount_if_mounted(&target));
            keep_first(&mut first_error, "unmount volume", unmounted);
        }
        let root_unmounted = unmount_if_mounted(self.mount_point());
        let root_released = root_unmounted.is_ok();
        keep_first(&mut first_error, "unmount root", root_unmounted);

        if root_released {
            for dir in [
                &self.overlay.merged_dir,
                &self.overlay.upper_dir,
                &self.overlay.work_dir,
            ] {
                keep_first(&mut first_error, "remove directory", mount::remove_dir_retrying(dir));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(mount_point = %self.mount_point().display(), "workspace removed");
                Ok(())
            }
        }
    }

    /// Resolves the volume's container path under the mount point, refusing
    /// paths that climb out of it.
    fn volume_target(&self, volume: &VolumeSpec) -> Result<PathBuf> {
        let relative: PathBuf = volume
            .container_path
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::CurDir))
            .collect();
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(HutchError::Config {
                message: format!(
                    "volume target escapes the container root: {}",
                    volume.container_path.display()
                ),
            });
        }
        Ok(self.mount_point().join(relative))
    }
}

fn unmount_if_mounted(target: &Path) -> Result<()> {
    if mountinfo::is_mounted(target)? {
        mount::unmount(target)?;
    }
    Ok(())
}

fn keep_first(slot: &mut Option<HutchError>, step: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!(step, error = %e, "workspace teardown step failed");
        let _ = slot.get_or_insert(e);
    }
}
