//! Unified error type for the hutch workspace.
//!
//! Every library crate returns [`HutchError`]; the CLI converts it into an
//! `anyhow::Error` at the command boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HutchError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or user argument is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("no such {kind}: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A resource with the same identifier already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Type of the conflicting resource.
        kind: &'static str,
        /// Identifier that is already taken.
        id: String,
    },

    /// The requested operation is not valid in the resource's current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the state conflict.
        message: String,
    },

    /// A system call failed.
    #[error("{operation} failed: {message}")]
    Syscall {
        /// Name of the failing operation.
        operation: &'static str,
        /// Kernel error description.
        message: String,
    },

    /// A cgroup subsystem could not be configured.
    #[error("cgroup error: {message}")]
    Cgroup {
        /// Description of the failure.
        message: String,
    },

    /// Bridge, netlink, or firewall configuration failed.
    #[error("network error: {message}")]
    Network {
        /// Description of the failure.
        message: String,
    },

    /// No free address is left in a subnet.
    #[error("no free address left in subnet {subnet}")]
    AddressExhausted {
        /// The exhausted subnet in CIDR notation.
        subnet: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl HutchError {
    /// Builds a [`HutchError::Syscall`] from any displayable kernel error.
    pub fn syscall(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Syscall {
            operation,
            message: err.to_string(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HutchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_renders_no_such_prefix() {
        let err = HutchError::NotFound {
            kind: "network",
            id: "testnet".into(),
        };
        assert_eq!(err.to_string(), "no such network: testnet");
    }

    #[test]
    fn syscall_helper_keeps_operation_name() {
        let err = HutchError::syscall("pivot_root", "EINVAL: Invalid argument");
        assert_eq!(
            err.to_string(),
            "pivot_root failed: EINVAL: Invalid argument"
        );
    }
}
