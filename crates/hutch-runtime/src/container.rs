//! The persisted container record.

use hutch_common::constants::CREATE_TIME_FORMAT;
use hutch_common::types::{ContainerId, ContainerStatus};
use serde::{Deserialize, Serialize};

/// Metadata of one container, stored as `config.json` in its state directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    /// Host pid of the container init while it runs.
    pub pid: Option<u32>,
    /// Random container ID.
    pub id: ContainerId,
    /// Container name; defaults to the ID.
    pub name: String,
    /// User command, space joined.
    pub command: String,
    /// Local creation time.
    pub create_time: String,
    /// Lifecycle status.
    pub status: ContainerStatus,
    /// Volume spec as given on the command line.
    #[serde(default)]
    pub volume: String,
    /// Published ports as `hostPort:containerPort` strings.
    #[serde(default)]
    pub port_mapping: Vec<String>,
    /// Image the root filesystem was built from.
    #[serde(default)]
    pub image: String,
    /// Network the container is attached to, if any.
    #[serde(default)]
    pub network: Option<String>,
}

impl ContainerInfo {
    /// Creates a running record stamped with the current local time.
    #[must_use]
    pub fn new(id: ContainerId, name: String, pid: u32, command: &[String]) -> Self {
        Self {
            pid: Some(pid),
            id,
            name,
            command: command.join(" "),
            create_time: chrono::Local::now().format(CREATE_TIME_FORMAT).to_string(),
            status: ContainerStatus::Running,
            volume: String::new(),
            port_mapping: Vec::new(),
            image: String::new(),
            network: None,
        }
    }

    /// Marks the container as ended with `status`, clearing its pid.
    pub fn finish(&mut self, status: ContainerStatus) {
        self.status = status;
        self.pid = None;
    }

    /// Volume spec, if one was given.
    #[must_use]
    pub fn volume(&self) -> Option<&str> {
        Some(self.volume.as_str()).filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ContainerInfo {
        ContainerInfo::new(
            ContainerId::new("4f2a9c1b7e"),
            "web".into(),
            4242,
            &["top".into(), "-b".into()],
        )
    }

    #[test]
    fn new_record_is_running_with_pid() {
        let info = sample();
        assert_eq!(info.status, ContainerStatus::Running);
        assert_eq!(info.pid, Some(4242));
        assert_eq!(info.command, "top -b");
        assert_eq!(info.create_time.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn finish_clears_pid() {
        let mut info = sample();
        info.finish(ContainerStatus::Stopped);
        assert_eq!(info.status, ContainerStatus::Stopped);
        assert!(info.pid.is_none());
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let mut info = sample();
        info.port_mapping = vec!["8080:80".into()];
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["createTime"], info.create_time.as_str());
        assert_eq!(json["portMapping"][0], "8080:80");
        assert_eq!(json["status"], "running");
        assert_eq!(json["id"], "4f2a9c1b7e");
    }

    #[test]
    fn empty_volume_reads_as_none() {
        let mut info = sample();
        assert!(info.volume().is_none());
        info.volume = "/data:/srv".into();
        assert_eq!(info.volume(), Some("/data:/srv"));
    }
}
