//! `hutch enter`: joins a container's namespaces on behalf of `exec`.

use clap::Args;

/// Arguments for the hidden `enter` command. The target pid and command
/// are passed through the environment.
#[derive(Args, Debug)]
pub struct EnterArgs {}

/// Executes the `enter` helper and exits with the command's status.
///
/// # Errors
///
/// Returns an error if the namespaces cannot be joined.
pub fn execute(_args: EnterArgs) -> anyhow::Result<()> {
    let code = hutch_runtime::exec::enter_from_env()?;
    std::process::exit(code);
}
