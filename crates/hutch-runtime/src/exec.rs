//! Namespace joining for executing commands in running containers.
//!
//! `exec` cannot call `setns(2)` for the mount namespace from a
//! multi-threaded process, so it re-executes the binary as the hidden
//! `enter` subcommand with the target pid and command in the environment.
//! `enter` joins the namespaces first and then runs the command through
//! `/bin/sh -c`.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Command;

use hutch_common::constants::{ENV_EXEC_CMD, ENV_EXEC_PID};
use hutch_common::error::{HutchError, Result};
use hutch_core::namespace::enter_namespaces;

const SHELL: &str = "/bin/sh";

/// Runs `command` inside the namespaces of `pid` and returns its exit code.
///
/// The helper inherits the container's environment, read from
/// `/proc/<pid>/environ`, and the caller's standard streams.
///
/// # Errors
///
/// Returns an error if the command is empty, the environment cannot be
/// read, or the helper cannot be spawned.
pub fn exec_in_container(pid: u32, command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Err(HutchError::Config {
            message: "exec command is empty".into(),
        });
    }
    let line = command.join(" ");
    tracing::info!(pid, command = %line, "exec into container");

    let exe = std::env::current_exe().map_err(|e| HutchError::Io {
        path: PathBuf::from("/proc/self/exe"),
        source: e,
    })?;
    let env = read_environ(pid)?;

    let status = Command::new(&exe)
        .arg("enter")
        .env_clear()
        .envs(env)
        .env(ENV_EXEC_PID, pid.to_string())
        .env(ENV_EXEC_CMD, &line)
        .status()
        .map_err(|e| HutchError::Io { path: exe, source: e })?;

    Ok(exit_code(status))
}

/// Joins the namespaces named by the `enter` environment contract and
/// runs the command there. Returns the command's exit code.
///
/// # Errors
///
/// Returns an error if either variable is missing, the namespaces cannot
/// be joined, or the shell cannot be spawned.
pub fn enter_from_env() -> Result<i32> {
    let (Ok(pid), Ok(command)) = (std::env::var(ENV_EXEC_PID), std::env::var(ENV_EXEC_CMD)) else {
        return Err(HutchError::InvalidState {
            message: format!("enter requires {ENV_EXEC_PID} and {ENV_EXEC_CMD}"),
        });
    };
    let pid: u32 = pid.parse().map_err(|_| HutchError::Config {
        message: format!("invalid {ENV_EXEC_PID}: {pid}"),
    })?;

    enter_namespaces(pid)?;
    nix::unistd::chdir("/").map_err(|e| HutchError::syscall("chdir /", e))?;

    let status = Command::new(SHELL)
        .arg("-c")
        .arg(&command)
        .env_remove(ENV_EXEC_PID)
        .env_remove(ENV_EXEC_CMD)
        .status()
        .map_err(|e| HutchError::Io {
            path: PathBuf::from(SHELL),
            source: e,
        })?;
    Ok(exit_code(status))
}

/// Reads `/proc/<pid>/environ` into key/value pairs.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_environ(pid: u32) -> Result<Vec<(String, String)>> {
    let path = PathBuf::from(format!("/proc/{pid}/environ"));
    let bytes = std::fs::read(&path).map_err(|e| HutchError::Io { path, source: e })?;
    Ok(parse_environ(&bytes))
}

fn parse_environ(bytes: &[u8]) -> Vec<(String, String)> {
    bytes
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environ_is_split_on_nul() {
        let env = parse_environ(b"PATH=/bin\0HOME=/root\0EMPTY=\0junk\0");
        assert_eq!(
            env,
            vec![
                ("PATH".to_string(), "/bin".to_string()),
                ("HOME".to_string(), "/root".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn own_environ_is_readable() {
        let env = read_environ(std::process::id()).expect("read environ");
        assert!(!env.is_empty() || std::env::vars().next().is_none());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(exec_in_container(std::process::id(), &[]).is_err());
    }

    #[test]
    fn signal_exit_maps_above_128() {
        let status = std::process::ExitStatus::from_raw(9);
        assert_eq!(exit_code(status), 137);
    }
}
