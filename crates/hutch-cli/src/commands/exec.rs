//! `hutch exec`: run a command inside a running container.

use clap::Args;
use hutch_runtime::engine::Engine;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container name.
    pub container: String,

    /// Command to execute.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command and exits with the command's status.
///
/// # Errors
///
/// Returns an error if the container is not running or its namespaces
/// cannot be joined.
pub fn execute(args: ExecArgs, engine: &Engine) -> anyhow::Result<()> {
    let code = engine.exec(&args.container, &args.command)?;
    std::process::exit(code);
}
