//! Global configuration model for the hutch runtime.
//!
//! Every on-disk location used by the runtime is derived from a
//! [`HutchConfig`], so tests and alternative installs can relocate the whole
//! tree with [`HutchConfig::with_root`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration for the hutch runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HutchConfig {
    /// Directory holding container metadata and the network registry.
    pub state_dir: PathBuf,
    /// Directory holding images, write layers, and mount points.
    pub storage_dir: PathBuf,
    /// Fixed parent directory for cgroup v1 hierarchies.
    ///
    /// `None` discovers each subsystem's mount from `/proc/self/mountinfo`.
    pub cgroup_root: Option<PathBuf>,
}

impl Default for HutchConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(constants::DEFAULT_STATE_DIR),
            storage_dir: PathBuf::from(constants::DEFAULT_STORAGE_DIR),
            cgroup_root: None,
        }
    }
}

impl HutchConfig {
    /// Places state and storage under a single root directory.
    ///
    /// Cgroup hierarchies are still discovered from the host.
    #[must_use]
    pub fn with_root(root: &Path) -> Self {
        Self {
            state_dir: root.join("run"),
            storage_dir: root.join("lib"),
            cgroup_root: None,
        }
    }

    /// Overrides cgroup hierarchy discovery with a fixed root.
    #[must_use]
    pub fn with_cgroup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cgroup_root = Some(root.into());
        self
    }

    /// Directory containing one subdirectory per container.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.state_dir.join("containers")
    }

    /// Metadata directory of a single container.
    #[must_use]
    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.containers_dir().join(name)
    }

    /// Metadata file of a single container.
    #[must_use]
    pub fn container_config(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::CONFIG_FILE_NAME)
    }

    /// Log file of a detached container.
    #[must_use]
    pub fn container_log(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::LOG_FILE_NAME)
    }

    /// Directory holding one file per network.
    #[must_use]
    pub fn networks_dir(&self) -> PathBuf {
        self.state_dir.join("network").join("networks")
    }

    /// Directory holding one file per endpoint.
    #[must_use]
    pub fn endpoints_dir(&self) -> PathBuf {
        self.state_dir.join("network").join("endpoints")
    }

    /// IPAM allocation store.
    #[must_use]
    pub fn ipam_file(&self) -> PathBuf {
        self.state_dir
            .join("network")
            .join("ipam")
            .join(constants::IPAM_FILE_NAME)
    }

    /// Directory holding image archives and their extracted layers.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.storage_dir.join("images")
    }

    /// Archive of an image, used as extraction input and commit output.
    #[must_use]
    pub fn image_archive(&self, image: &str) -> PathBuf {
        self.images_dir().join(format!("{image}.tar"))
    }

    /// Extracted read-only layer of an image.
    #[must_use]
    pub fn image_layer(&self, image: &str) -> PathBuf {
        self.images_dir().join(image)
    }

    /// Writable layer of a container.
    #[must_use]
    pub fn write_layer(&self, name: &str) -> PathBuf {
        self.storage_dir.join("writelayer").join(name)
    }

    /// Overlay work directory of a container.
    #[must_use]
    pub fn work_dir(&self, name: &str) -> PathBuf {
        self.storage_dir.join("work").join(name)
    }

    /// Merged root filesystem of a container.
    #[must_use]
    pub fn mount_point(&self, name: &str) -> PathBuf {
        self.storage_dir.join("mnt").join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_follow_system_dirs() {
        let config = HutchConfig::default();
        assert_eq!(
            config.container_config("web"),
            PathBuf::from("/var/run/hutch/containers/web/config.json")
        );
        assert_eq!(
            config.ipam_file(),
            PathBuf::from("/var/run/hutch/network/ipam/subnet.json")
        );
        assert_eq!(
            config.image_archive("busybox"),
            PathBuf::from("/var/lib/hutch/images/busybox.tar")
        );
        assert_eq!(
            config.mount_point("web"),
            PathBuf::from("/var/lib/hutch/mnt/web")
        );
    }

    #[test]
    fn with_root_relocates_everything() {
        let config = HutchConfig::with_root(Path::new("/tmp/h"));
        assert!(config.container_log("a").starts_with("/tmp/h/run"));
        assert!(config.write_layer("a").starts_with("/tmp/h/lib"));
        assert!(config.cgroup_root.is_none());
    }
}
