//! Container log management.
//!
//! A detached container's stdout and stderr go straight to a file in its
//! state directory; `logs` prints that file.

use std::fs::File;
use std::path::PathBuf;

use hutch_common::config::HutchConfig;
use hutch_common::error::{HutchError, Result};

/// Returns the log file path for a container.
#[must_use]
pub fn log_path(config: &HutchConfig, name: &str) -> PathBuf {
    config.container_log(name)
}

/// Reads container logs from disk.
///
/// Returns an empty string if the log file does not exist, which is the
/// case for attached containers.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_logs(config: &HutchConfig, name: &str) -> Result<String> {
    let path = log_path(config, name);
    if !path.exists() {
        return Ok(String::new());
    }
    let bytes = std::fs::read(&path).map_err(|e| HutchError::Io { path, source: e })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Creates (or truncates) the log file that receives a detached
/// container's output.
///
/// Creates the container's state directory if it does not exist.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created.
pub fn create_log(config: &HutchConfig, name: &str) -> Result<File> {
    let path = log_path(config, name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HutchError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    File::create(&path).map_err(|e| HutchError::Io { path, source: e })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;

    use super::*;

    #[test]
    fn log_path_is_inside_container_dir() {
        let config = HutchConfig::with_root(Path::new("/tmp/h"));
        let p = log_path(&config, "web");
        assert_eq!(p, PathBuf::from("/tmp/h/run/containers/web/container.log"));
    }

    #[test]
    fn read_logs_missing_file_returns_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HutchConfig::with_root(dir.path());
        let content = read_logs(&config, "nonexistent").expect("should succeed");
        assert!(content.is_empty());
    }

    #[test]
    fn written_output_is_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HutchConfig::with_root(dir.path());
        let mut file = create_log(&config, "web").expect("create");
        writeln!(file, "line one").unwrap();
        writeln!(file, "line two").unwrap();

        let content = read_logs(&config, "web").expect("read");
        assert_eq!(content, "line one\nline two\n");
    }

    #[test]
    fn separate_containers_have_separate_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HutchConfig::with_root(dir.path());
        writeln!(create_log(&config, "a").unwrap(), "from a").unwrap();
        writeln!(create_log(&config, "b").unwrap(), "from b").unwrap();

        let a_logs = read_logs(&config, "a").expect("read a");
        assert!(a_logs.contains("from a"));
        assert!(!a_logs.contains("from b"));
    }

    #[test]
    fn create_truncates_previous_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HutchConfig::with_root(dir.path());
        writeln!(create_log(&config, "web").unwrap(), "old").unwrap();
        let _ = create_log(&config, "web").unwrap();
        assert!(read_logs(&config, "web").unwrap().is_empty());
    }
}
