//! `hutch init`: container init, started by `run` inside the new namespaces.

use clap::Args;

/// Arguments for the hidden `init` command. The command arrives on fd 3.
#[derive(Args, Debug)]
pub struct InitArgs {}

/// Executes the container init. Only returns on failure.
///
/// # Errors
///
/// Returns an error if the root filesystem cannot be prepared or the
/// command cannot be executed.
pub fn execute(_args: InitArgs) -> anyhow::Result<()> {
    match hutch_runtime::init::run_container_init() {
        Ok(never) => match never {},
        Err(e) => Err(anyhow::Error::new(e).context("container init failed")),
    }
}
