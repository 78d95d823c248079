//! `hutch rm`: remove a stopped container.

use clap::Args;
use hutch_runtime::engine::Engine;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container does not exist or is still running.
pub fn execute(args: RmArgs, engine: &Engine) -> anyhow::Result<()> {
    engine.remove(&args.container)?;
    println!("{}", args.container);
    Ok(())
}

#[cfg(test)]
mod tests {
    use hutch_common::config::HutchConfig;
    use hutch_common::error::HutchError;

    use super::*;

    #[test]
    fn runtime_errors_keep_their_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Engine::new(HutchConfig::with_root(dir.path()));

        let err = execute(RmArgs { container: "ghost".into() }, &engine).expect_err("missing");

        assert!(matches!(
            err.downcast_ref::<HutchError>(),
            Some(HutchError::NotFound { kind: "container", .. })
        ));
        assert_eq!(err.to_string(), "no such container: ghost");
    }
}
