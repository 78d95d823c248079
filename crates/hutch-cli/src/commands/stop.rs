//! `hutch stop`: stop a running container.

use clap::Args;
use hutch_runtime::engine::Engine;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `stop` command.
///
/// Sends SIGTERM, escalates to SIGKILL after a grace period, and marks the
/// container stopped.
///
/// # Errors
///
/// Returns an error if the container does not exist or is not running.
pub fn execute(args: StopArgs, engine: &Engine) -> anyhow::Result<()> {
    engine.stop(&args.container)?;
    println!("{}", args.container);
    Ok(())
}
