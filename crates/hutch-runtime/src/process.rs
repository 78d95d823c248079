//! Launching and signalling container processes.
//!
//! The container init is a copy of this binary cloned into fresh
//! namespaces and re-executed as `init`. It starts with its working
//! directory at the workspace mount point and the read end of a pipe on
//! fd 3; the user command arrives through that pipe once the parent has
//! finished cgroup and network setup.

use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use hutch_common::constants::{INIT_PIPE_FD, STOP_POLL_INTERVAL};
use hutch_common::error::{HutchError, Result};
use hutch_core::namespace::container_clone_flags;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

const STACK_SIZE: usize = 1024 * 1024;

/// Lowest descriptor the child's inherited fds are moved to before it
/// rearranges 0..=3.
const HIGH_FD_FLOOR: RawFd = 10;

/// Exit code of the cloned child when it cannot re-execute itself.
const EXEC_FAILED: isize = 127;

/// Where the container's standard streams go.
#[derive(Debug)]
pub enum Stdio {
    /// Share the caller's terminal (attached mode).
    Inherit,
    /// Send stdout and stderr to this file and read stdin from `/dev/null`
    /// (detached mode).
    Log(File),
}

/// Parameters for [`launch`].
#[derive(Debug)]
pub struct LaunchOptions {
    /// Root filesystem the init pivots into; becomes its working directory.
    pub mount_point: PathBuf,
    /// Standard stream handling.
    pub stdio: Stdio,
    /// Extra `KEY=VALUE` variables layered over the caller's environment.
    pub env: Vec<String>,
}

/// A launched container init that has not received its command yet.
#[derive(Debug)]
pub struct ContainerProcess {
    pid: Pid,
    command_pipe: Option<File>,
}

impl ContainerProcess {
    /// Host pid of the container init.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid.as_raw().unsigned_abs()
    }

    /// Hands the user command to the init and closes the pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if the command was already sent or the write fails.
    pub fn send_command(&mut self, command: &[String]) -> Result<()> {
        let mut pipe = self.command_pipe.take().ok_or_else(|| HutchError::InvalidState {
            message: "container command was already sent".into(),
        })?;
        let line = command.join(" ");
        pipe.write_all(line.as_bytes())
            .map_err(|e| HutchError::syscall("write init pipe", e))?;
        tracing::debug!(pid = self.pid(), command = %line, "command sent to container init");
        Ok(())
    }

    /// Blocks until the init exits and returns its exit code.
    ///
    /// A process killed by a signal reports `128 + signal`.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid` fails.
    pub fn wait(&self) -> Result<i32> {
        wait_for(self.pid)
    }

    /// Kills and reaps the init. Used to roll back a failed `run`.
    pub fn kill(&mut self) {
        drop(self.command_pipe.take());
        if let Err(e) = kill(self.pid, Signal::SIGKILL) {
            tracing::warn!(pid = self.pid(), error = %e, "failed to kill container init");
            return;
        }
        if let Err(e) = waitpid(self.pid, None) {
            tracing::warn!(pid = self.pid(), error = %e, "failed to reap container init");
        }
    }
}

/// Clones a child into new UTS, PID, mount, network, and IPC namespaces and
/// re-executes the current binary as `init` inside it.
///
/// # Errors
///
/// Returns an error if the binary path cannot be resolved, the pipe cannot
/// be created, or `clone(2)` fails.
pub fn launch(options: LaunchOptions) -> Result<ContainerProcess> {
    let exe = std::env::current_exe().map_err(|e| HutchError::Io {
        path: PathBuf::from("/proc/self/exe"),
        source: e,
    })?;
    let exe_c = path_cstring(&exe)?;
    let argv = [exe_c.clone(), cstring("init")?];
    let envp = build_env(std::env::vars_os().map(|(k, v)| env_pair(&k, &v)), &options.env)
        .into_iter()
        .map(|entry| cstring(&entry))
        .collect::<Result<Vec<_>>>()?;
    let workdir = path_cstring(&options.mount_point)?;

    let (read_end, write_end) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
        .map_err(|e| HutchError::syscall("pipe2", e))?;
    let pipe_fd = raise_fd(read_end.as_raw_fd())?;
    let (log_fd, null_fd) = match &options.stdio {
        Stdio::Inherit => (None, None),
        Stdio::Log(file) => {
            let null = File::open("/dev/null").map_err(|e| HutchError::Io {
                path: PathBuf::from("/dev/null"),
                source: e,
            })?;
            (
                Some(raise_fd(file.as_raw_fd())?),
                Some(raise_fd(null.as_raw_fd())?),
            )
        }
    };
    let child_fds = ChildFds {
        pipe: pipe_fd.as_raw_fd(),
        log: log_fd.as_ref().map(AsRawFd::as_raw_fd),
        null: null_fd.as_ref().map(AsRawFd::as_raw_fd),
    };

    let argv_ptrs = nul_terminated(&argv);
    let envp_ptrs = nul_terminated(&envp);

    let mut stack = vec![0u8; STACK_SIZE];
    let child = Box::new(|| child_main(&child_fds, &workdir, &exe_c, &argv_ptrs, &envp_ptrs));

    // SAFETY: without CLONE_VM the child gets a private copy of the address
    // space, so the closure and everything it borrows stay valid in it. The
    // child only issues raw syscalls on pre-built C strings before execve.
    let pid = unsafe {
        nix::sched::clone(
            child,
            &mut stack,
            container_clone_flags(),
            Some(libc::SIGCHLD),
        )
    }
    .map_err(|e| HutchError::syscall("clone", e))?;

    tracing::info!(pid = pid.as_raw(), mount_point = %options.mount_point.display(), "container init launched");
    Ok(ContainerProcess {
        pid,
        command_pipe: Some(File::from(write_end)),
    })
}

/// Descriptors the child wires into place before re-executing.
struct ChildFds {
    pipe: RawFd,
    log: Option<RawFd>,
    null: Option<RawFd>,
}

/// Body of the cloned child. Runs with a copied address space, so it only
/// issues raw syscalls on data prepared by the parent.
fn child_main(
    fds: &ChildFds,
    workdir: &CString,
    exe: &CString,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
) -> isize {
    // SAFETY: every descriptor is owned by the parent and still open in the
    // child's copy of the fd table; dup2 only rewires the child's table.
    unsafe {
        if libc::dup2(fds.pipe, INIT_PIPE_FD) < 0 {
            return EXEC_FAILED;
        }
        if let (Some(log), Some(null)) = (fds.log, fds.null) {
            if libc::dup2(null, libc::STDIN_FILENO) < 0
                || libc::dup2(log, libc::STDOUT_FILENO) < 0
                || libc::dup2(log, libc::STDERR_FILENO) < 0
            {
                return EXEC_FAILED;
            }
        }
        if libc::chdir(workdir.as_ptr()) < 0 {
            return EXEC_FAILED;
        }
        // Both arrays are NUL-terminated and point into C strings that live
        // until execve replaces the process image.
        let _ = libc::execve(exe.as_ptr(), argv.as_ptr(), envp.as_ptr());
    }
    EXEC_FAILED
}

/// Pointer array over `strings` with the trailing NULL `execve` expects.
fn nul_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Duplicates `fd` to a close-on-exec descriptor at or above
/// [`HIGH_FD_FLOOR`], out of the way of the slots the child fills.
fn raise_fd(fd: RawFd) -> Result<OwnedFd> {
    // SAFETY: F_DUPFD_CLOEXEC on a valid descriptor returns a new one that
    // nothing else owns.
    let raised = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, HIGH_FD_FLOOR) };
    if raised < 0 {
        return Err(HutchError::syscall("fcntl", std::io::Error::last_os_error()));
    }
    // SAFETY: `raised` was just created and is owned exclusively here.
    Ok(unsafe { OwnedFd::from_raw_fd(raised) })
}

/// Merges the host environment with `KEY=VALUE` overrides; a later
/// definition of a key replaces an earlier one.
pub fn build_env(host: impl IntoIterator<Item = String>, extra: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for entry in host.into_iter().chain(extra.iter().cloned()) {
        let Some((key, _)) = entry.split_once('=') else {
            tracing::warn!(entry = %entry, "ignoring environment entry without '='");
            continue;
        };
        let prefix = format!("{key}=");
        merged.retain(|existing| !existing.starts_with(&prefix));
        merged.push(entry);
    }
    merged
}

fn env_pair(key: &OsStr, value: &OsStr) -> String {
    format!("{}={}", key.to_string_lossy(), value.to_string_lossy())
}

fn cstring(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| HutchError::Config {
        message: format!("value contains a NUL byte: {value:?}"),
    })
}

fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| HutchError::Config {
        message: format!("path contains a NUL byte: {}", path.display()),
    })
}

fn wait_for(pid: Pid) -> Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => {}
            Err(e) => return Err(HutchError::syscall("waitpid", e)),
        }
    }
}

fn to_pid(pid: u32) -> Result<Pid> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| HutchError::Config {
            message: format!("invalid pid {pid}"),
        })
}

/// Whether `pid` names a live process. Zombies count as dead.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    let Ok(target) = to_pid(pid) else {
        return false;
    };
    if kill(target, None).is_err() {
        return false;
    }
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .is_ok_and(|stat| process_state(&stat) != Some('Z'))
}

/// Extracts the state letter from the contents of `/proc/<pid>/stat`.
fn process_state(stat: &str) -> Option<char> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm.trim_start().chars().next()
}

/// Sends SIGTERM, waits up to `grace`, escalates to SIGKILL, and confirms
/// the process is gone.
///
/// # Errors
///
/// Returns an error if signalling fails or the process survives SIGKILL.
pub fn terminate(pid: u32, grace: Duration) -> Result<()> {
    let target = to_pid(pid)?;
    match kill(target, Signal::SIGTERM) {
        Ok(()) => tracing::debug!(pid, "sent SIGTERM"),
        Err(nix::errno::Errno::ESRCH) => return Ok(()),
        Err(e) => return Err(HutchError::syscall("kill", e)),
    }
    if wait_until_dead(pid, grace) {
        return Ok(());
    }

    match kill(target, Signal::SIGKILL) {
        Ok(()) => tracing::info!(pid, "process ignored SIGTERM, sent SIGKILL"),
        Err(nix::errno::Errno::ESRCH) => return Ok(()),
        Err(e) => return Err(HutchError::syscall("kill", e)),
    }
    if wait_until_dead(pid, grace) {
        Ok(())
    } else {
        Err(HutchError::InvalidState {
            message: format!("process {pid} is still alive after SIGKILL"),
        })
    }
}

fn wait_until_dead(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return true;
        }
        std::thread::sleep(STOP_POLL_INTERVAL);
    }
    !is_alive(pid)
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    #[test]
    fn extra_env_overrides_host_values() {
        let host = vec!["PATH=/usr/bin".to_string(), "HOME=/root".to_string()];
        let extra = vec!["HOME=/srv".to_string(), "MODE=prod".to_string()];
        let env = build_env(host, &extra);
        assert_eq!(env, vec!["PATH=/usr/bin", "HOME=/srv", "MODE=prod"]);
    }

    #[test]
    fn env_entries_without_separator_are_dropped() {
        let env = build_env(vec!["A=1".to_string()], &["bogus".to_string()]);
        assert_eq!(env, vec!["A=1"]);
    }

    #[test]
    fn state_letter_survives_parens_in_comm() {
        assert_eq!(process_state("42 (sleep) S 1 42"), Some('S'));
        assert_eq!(process_state("42 (a) b) Z 1 42"), Some('Z'));
        assert_eq!(process_state("garbage"), None);
    }

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(!is_alive(u32::MAX));
    }

    #[test]
    fn terminate_stops_a_child() {
        let child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        let pid = child.id();
        assert!(is_alive(pid));

        terminate(pid, Duration::from_secs(2)).expect("terminate");
        assert!(!is_alive(pid));
    }

    #[test]
    fn terminate_of_missing_process_succeeds() {
        let mut child = Command::new("true").spawn().expect("spawn");
        let pid = child.id();
        let _ = child.wait().unwrap();
        terminate(pid, Duration::from_millis(100)).expect("already gone");
    }
}
