//! `hutch logs`: print the output of a detached container.

use clap::Args;
use hutch_runtime::engine::Engine;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container does not exist or its log cannot be read.
pub fn execute(args: LogsArgs, engine: &Engine) -> anyhow::Result<()> {
    let content = engine.logs(&args.container)?;
    print!("{content}");
    Ok(())
}
