//! Persisted network records.

use std::path::{Path, PathBuf};

use hutch_common::error::{HutchError, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

/// Longest device name the kernel accepts (`IFNAMSIZ - 1`).
pub const MAX_NAME_LEN: usize = 15;

/// A named container network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Unique network name; also the bridge device name.
    pub name: String,
    /// Gateway address together with the subnet prefix, e.g. `192.168.10.1/24`.
    pub ip_range: Ipv4Network,
    /// Name of the driver that owns the network.
    pub driver: String,
}

impl Network {
    /// Checks that `name` is a valid network device name, which also keeps
    /// it a single file name under the networks directory.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Config`] if the name is empty, longer than
    /// [`MAX_NAME_LEN`] bytes, `.` or `..`, or contains `/`, `:`, NUL, or
    /// whitespace.
    pub fn validate_name(name: &str) -> Result<()> {
        let problem = if name.is_empty() {
            Some("must not be empty")
        } else if name.len() > MAX_NAME_LEN {
            Some("is longer than 15 bytes")
        } else if name == "." || name == ".." {
            Some("is reserved")
        } else if name
            .chars()
            .any(|c| c == '/' || c == ':' || c == '\0' || c.is_whitespace())
        {
            Some("contains '/', ':', NUL, or whitespace")
        } else {
            None
        };
        problem.map_or(Ok(()), |problem| {
            Err(HutchError::Config {
                message: format!("invalid network name {name:?}: {problem}"),
            })
        })
    }

    /// The subnet in canonical form, e.g. `192.168.10.0/24`.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip_range.network(), self.ip_range.prefix()).unwrap_or(self.ip_range)
    }

    /// Writes the record to `<dir>/<name>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn dump(&self, dir: &Path) -> Result<()> {
        write_record(dir, &self.name, self)
    }

    /// Reads the record stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        read_record(path)
    }

    /// Deletes the record from `dir`. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self, dir: &Path) -> Result<()> {
        remove_record(dir, &self.name)
    }
}

/// Serializes `value` as JSON to `<dir>/<name>`.
pub(crate) fn write_record<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| HutchError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let path = dir.join(name);
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(&path, json).map_err(|e| HutchError::Io { path, source: e })
}

pub(crate) fn read_record<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|e| HutchError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub(crate) fn remove_record(dir: &Path, name: &str) -> Result<()> {
    let path = dir.join(name);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HutchError::Io { path, source: e }),
    }
}

/// Lists the regular files of `dir`; a missing directory yields nothing.
pub(crate) fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(HutchError::Io {
                path: dir.to_path_buf(),
                source: e,
            });
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}
