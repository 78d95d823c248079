//! Persistent container state.
//!
//! Each container owns a directory under the containers directory holding
//! its `config.json` and, in detached mode, its log file. There is no
//! daemon: every command reads and rewrites these files directly.

use std::path::PathBuf;

use hutch_common::config::HutchConfig;
use hutch_common::error::{HutchError, Result};
use hutch_common::types::validate_name;

use crate::container::ContainerInfo;

/// Reader and writer of container records.
#[derive(Debug, Clone)]
pub struct StateStore {
    config: HutchConfig,
}

impl StateStore {
    /// Creates a store rooted at the configured containers directory.
    #[must_use]
    pub fn new(config: &HutchConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Writes the record of `info`, creating its directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid container name, or the
    /// directory or file cannot be written.
    pub fn save(&self, info: &ContainerInfo) -> Result<()> {
        let dir = self.dir(&info.name)?;
        std::fs::create_dir_all(&dir).map_err(|e| HutchError::Io {
            path: dir.clone(),
            source: e,
        })?;
        let path = self.config.container_config(&info.name);
        let json = serde_json::to_vec_pretty(info)?;
        std::fs::write(&path, json).map_err(|e| HutchError::Io { path, source: e })?;
        tracing::debug!(name = %info.name, status = %info.status, "container record saved");
        Ok(())
    }

    /// Reads the record of container `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Config`] for an invalid name,
    /// [`HutchError::NotFound`] if no such container exists, or an error if
    /// its record is malformed.
    pub fn load(&self, name: &str) -> Result<ContainerInfo> {
        validate_name("container", name)?;
        let path = self.config.container_config(name);
        let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HutchError::NotFound {
                kind: "container",
                id: name.to_string(),
            },
            _ => HutchError::Io {
                path: path.clone(),
                source: e,
            },
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whether a record exists for `name`.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        validate_name("container", name).is_ok() && self.config.container_config(name).exists()
    }

    /// Reads every record, ordered by name. Malformed records are skipped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the containers directory cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerInfo>> {
        let dir = self.config.containers_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HutchError::Io { path: dir, source: e }),
        };

        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        let mut containers = Vec::with_capacity(names.len());
        for name in names {
            match self.load(&name) {
                Ok(info) => containers.push(info),
                Err(e) => tracing::warn!(name = %name, error = %e, "skipping container record"),
            }
        }
        Ok(containers)
    }

    /// Deletes the state directory of container `name`, log included.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the directory exists but
    /// cannot be removed.
    pub fn remove(&self, name: &str) -> Result<()> {
        let dir = self.dir(name)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HutchError::Io { path: dir, source: e }),
        }
    }

    fn dir(&self, name: &str) -> Result<PathBuf> {
        validate_name("container", name)?;
        Ok(self.config.container_dir(name))
    }
}
