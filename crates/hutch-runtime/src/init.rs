//! The container init, run as `hutch init` inside the new namespaces.
//!
//! Reads the user command from fd 3, switches the root filesystem to its
//! working directory, mounts `/proc` and `/dev`, and replaces itself with
//! the command. Any failure is fatal to the container.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::fd::FromRawFd;
use std::path::PathBuf;

use hutch_common::constants::INIT_PIPE_FD;
use hutch_common::error::{HutchError, Result};
use hutch_core::filesystem::mount::{make_root_private, mount_dev, mount_proc};
use hutch_core::filesystem::pivot_root::pivot_root;

/// Sets up the container root and executes the user command.
///
/// Only returns on failure.
///
/// # Errors
///
/// Returns an error if the command is empty, any mount or `pivot_root`
/// step fails, the program cannot be found, or `execv` fails.
pub fn run_container_init() -> Result<Infallible> {
    let command = read_command()?;
    let Some(program) = command.first() else {
        return Err(HutchError::Config {
            message: "container command is empty".into(),
        });
    };
    tracing::debug!(?command, "container init received command");

    make_root_private()?;
    let root = std::env::current_dir().map_err(|e| HutchError::Io {
        path: PathBuf::from("."),
        source: e,
    })?;
    pivot_root(&root)?;
    mount_proc()?;
    mount_dev()?;

    let path = which::which(program).map_err(|e| HutchError::NotFound {
        kind: "executable",
        id: format!("{program}: {e}"),
    })?;
    let path_c = CString::new(path.to_string_lossy().as_bytes()).map_err(|_| HutchError::Config {
        message: format!("executable path contains a NUL byte: {}", path.display()),
    })?;
    let args = command
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| HutchError::Config {
            message: "container command contains a NUL byte".into(),
        })?;

    nix::unistd::execv(&path_c, &args).map_err(|e| HutchError::syscall("execv", e))
}

/// Reads the whole command from the init pipe and splits it on whitespace.
fn read_command() -> Result<Vec<String>> {
    // SAFETY: the launcher installs the read end of the command pipe at
    // INIT_PIPE_FD, and nothing else in this process owns that descriptor.
    let mut pipe = unsafe { File::from_raw_fd(INIT_PIPE_FD) };
    let mut raw = String::new();
    let _ = pipe
        .read_to_string(&mut raw)
        .map_err(|e| HutchError::syscall("read init pipe", e))?;
    Ok(parse_command(&raw))
}

fn parse_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_split_on_whitespace() {
        assert_eq!(parse_command("top -b\n"), vec!["top", "-b"]);
        assert_eq!(parse_command("  sh   -c  ls "), vec!["sh", "-c", "ls"]);
        assert!(parse_command("").is_empty());
    }
}
