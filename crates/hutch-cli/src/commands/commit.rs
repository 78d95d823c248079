//! `hutch commit`: archive a container's root filesystem as an image.

use clap::Args;
use hutch_runtime::engine::Engine;

/// Arguments for the `commit` command.
#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Container name.
    pub container: String,

    /// Name of the image to write.
    pub image: String,
}

/// Executes the `commit` command and prints the archive path.
///
/// # Errors
///
/// Returns an error if the container has no mounted root or the archive
/// cannot be written.
pub fn execute(args: CommitArgs, engine: &Engine) -> anyhow::Result<()> {
    let archive = engine.commit(&args.container, &args.image)?;
    println!("{}", archive.display());
    Ok(())
}
