//! Scoped network-namespace switching.
//!
//! Namespace membership is a per-thread property. Work that must run inside
//! a container's network namespace is therefore executed on a dedicated
//! thread that nothing else shares: it records its original namespace,
//! switches, runs the closure, switches back, and exits.

use std::fs::File;
use std::path::PathBuf;
use std::thread;

use hutch_common::error::{HutchError, Result};
use nix::sched::{CloneFlags, setns};

const THREAD_NET_NS: &str = "/proc/thread-self/ns/net";

/// Runs `f` inside the network namespace referred to by `target`.
///
/// The calling thread's own namespace is never touched.
///
/// # Errors
///
/// Returns an error if the switch fails, if `f` fails, or if the worker
/// thread panics.
pub fn with_network_namespace<T, F>(target: &File, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send,
    T: Send,
{
    thread::scope(|scope| {
        let worker = scope.spawn(move || {
            let original = File::open(THREAD_NET_NS).map_err(|e| HutchError::Io {
                path: PathBuf::from(THREAD_NET_NS),
                source: e,
            })?;
            setns(target, CloneFlags::CLONE_NEWNET)
                .map_err(|e| HutchError::syscall("setns into container netns", e))?;
            tracing::debug!("entered container network namespace");

            let outcome = f();

            if let Err(e) = setns(&original, CloneFlags::CLONE_NEWNET) {
                tracing::error!(error = %e, "failed to restore network namespace");
            }
            outcome
        });
        worker.join().map_err(|_| HutchError::InvalidState {
            message: "network namespace worker panicked".into(),
        })?
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_result_is_returned_from_own_namespace() {
        // Switching into the namespace we are already in only needs CAP_SYS_ADMIN.
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let current = File::open("/proc/self/ns/net").expect("open own netns");
        let value = with_network_namespace(&current, || Ok(7)).expect("switch");
        assert_eq!(value, 7);
    }

    #[test]
    fn closure_error_is_propagated() {
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let current = File::open("/proc/self/ns/net").expect("open own netns");
        let result: Result<()> = with_network_namespace(&current, || {
            Err(HutchError::Network {
                message: "boom".into(),
            })
        });
        assert!(result.is_err());
    }
}
