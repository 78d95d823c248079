//! Domain primitive types used across the hutch workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::CONTAINER_ID_LEN;
use crate::error::HutchError;

/// Unique identifier for a container instance.
///
/// Also used as the container's cgroup path and as the prefix of its
/// endpoint IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID of [`CONTAINER_ID_LEN`] hex characters.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(CONTAINER_ID_LEN);
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Checks that a user-supplied `kind` name (container or image) is a single
/// path component, since it is joined into state and storage paths.
///
/// # Errors
///
/// Returns [`HutchError::Config`] if `name` is empty, `.` or `..`, or
/// contains `/` or NUL.
pub fn validate_name(kind: &str, name: &str) -> Result<(), HutchError> {
    let problem = if name.is_empty() {
        Some("must not be empty")
    } else if name == "." || name == ".." {
        Some("is reserved")
    } else if name.contains(['/', '\0']) {
        Some("contains '/' or NUL")
    } else {
        None
    };
    problem.map_or(Ok(()), |problem| {
        Err(HutchError::Config {
            message: format!("invalid {kind} name {name:?}: {problem}"),
        })
    })
}

/// Lifecycle status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The container process is alive.
    Running,
    /// The container was stopped through `stop`.
    Stopped,
    /// The container process ended on its own.
    Exited,
}

impl ContainerStatus {
    /// Whether the container may be removed in this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Exited)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Resource limits for a container, written verbatim to cgroup files.
///
/// A field that is `None` or empty is left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit, e.g. `100m`.
    pub memory_limit: Option<String>,
    /// Relative CPU weight, e.g. `512`.
    pub cpu_share: Option<String>,
    /// CPU list, e.g. `0-1`.
    pub cpu_set: Option<String>,
}

impl ResourceConfig {
    /// Returns the memory limit if it is set and non-empty.
    #[must_use]
    pub fn memory_limit(&self) -> Option<&str> {
        non_empty(self.memory_limit.as_deref())
    }

    /// Returns the CPU share if it is set and non-empty.
    #[must_use]
    pub fn cpu_share(&self) -> Option<&str> {
        non_empty(self.cpu_share.as_deref())
    }

    /// Returns the CPU set if it is set and non-empty.
    #[must_use]
    pub fn cpu_set(&self) -> Option<&str> {
        non_empty(self.cpu_set.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A `hostPort:containerPort` TCP forwarding entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
    /// Port on the host that receives traffic.
    pub host_port: u16,
    /// Port inside the container that traffic is forwarded to.
    pub container_port: u16,
}

impl FromStr for PortMapping {
    type Err = HutchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HutchError::Config {
            message: format!("invalid port mapping '{s}', expected hostPort:containerPort"),
        };
        let (host, container) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            host_port: host.trim().parse().map_err(|_| invalid())?,
            container_port: container.trim().parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_port, self.container_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_short_and_distinct() {
        let a = ContainerId::generate();
        let b = ContainerId::generate();
        assert_eq!(a.as_str().len(), CONTAINER_ID_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn names_are_single_path_components() {
        for name in ["web", "busybox", "my.app", "a-b_c", "..hidden"] {
            assert!(validate_name("container", name).is_ok(), "{name}");
        }
        for name in ["", ".", "..", "../..", "a/b", "/etc", "nul\0byte"] {
            let err = validate_name("container", name).expect_err(name);
            assert!(matches!(err, HutchError::Config { .. }));
        }
        assert!(
            validate_name("image", "..")
                .unwrap_err()
                .to_string()
                .contains("invalid image name")
        );
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ContainerStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert_eq!(ContainerStatus::Exited.to_string(), "exited");
    }

    #[test]
    fn empty_resource_fields_read_as_unset() {
        let cfg = ResourceConfig {
            memory_limit: Some(String::new()),
            cpu_share: Some("512".into()),
            cpu_set: None,
        };
        assert_eq!(cfg.memory_limit(), None);
        assert_eq!(cfg.cpu_share(), Some("512"));
        assert_eq!(cfg.cpu_set(), None);
    }

    #[test]
    fn port_mapping_parses_host_and_container() {
        let mapping: PortMapping = "8080:80".parse().unwrap();
        assert_eq!(mapping.host_port, 8080);
        assert_eq!(mapping.container_port, 80);
        assert_eq!(mapping.to_string(), "8080:80");
    }

    #[test]
    fn port_mapping_rejects_malformed_entries() {
        assert!("8080".parse::<PortMapping>().is_err());
        assert!("a:80".parse::<PortMapping>().is_err());
        assert!("80:70000".parse::<PortMapping>().is_err());
    }
}
