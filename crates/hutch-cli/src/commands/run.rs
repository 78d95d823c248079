//! `hutch run`: create and start a container from an image.

use clap::Args;
use hutch_common::types::ResourceConfig;
use hutch_runtime::engine::{Engine, RunOptions, RunOutcome};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach the container to this terminal (the default).
    #[arg(long = "ti", conflicts_with = "detach")]
    pub tty: bool,

    /// Run the container in the background with output sent to its log.
    #[arg(long = "d")]
    pub detach: bool,

    /// Memory limit, e.g. `100m`.
    #[arg(long = "m", value_name = "LIMIT")]
    pub memory: Option<String>,

    /// Relative CPU weight.
    #[arg(long = "cpushare", value_name = "SHARES")]
    pub cpu_share: Option<String>,

    /// CPUs the container may run on, e.g. `0-1`.
    #[arg(long = "cpuset", value_name = "CPUS")]
    pub cpu_set: Option<String>,

    /// Bind a host directory, as `host:container`.
    #[arg(long = "v", value_name = "HOST:CONTAINER")]
    pub volume: Option<String>,

    /// Container name; defaults to the generated ID.
    #[arg(long)]
    pub name: Option<String>,

    /// Network to connect the container to.
    #[arg(long = "net", value_name = "NETWORK")]
    pub network: Option<String>,

    /// Publish a container port, as `host:container`. Repeatable.
    #[arg(long = "p", value_name = "HOST:CONTAINER")]
    pub publish: Vec<String>,

    /// Extra environment variable, as `KEY=VALUE`. Repeatable.
    #[arg(long = "e", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Image to run.
    pub image: String,

    /// Command to run inside the container.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn into_options(self) -> RunOptions {
        RunOptions {
            detach: self.detach,
            resources: ResourceConfig {
                memory_limit: self.memory,
                cpu_share: self.cpu_share,
                cpu_set: self.cpu_set,
            },
            volume: self.volume,
            name: self.name,
            network: self.network,
            port_mapping: self.publish,
            env: self.env,
            image: self.image,
            command: self.command,
        }
    }
}

/// Executes the `run` command.
///
/// Detached runs print the container ID and return. Attached runs wait for
/// the container and exit with its status; Ctrl+C is delivered to the
/// container rather than to hutch, so cleanup still happens.
///
/// # Errors
///
/// Returns an error if the container cannot be created or started.
pub fn execute(args: RunArgs, engine: &Engine) -> anyhow::Result<()> {
    if args.tty || !args.detach {
        ctrlc::set_handler(|| tracing::debug!("interrupt left to the container"))?;
    }

    let outcome = engine.run(args.into_options())?;

    match outcome {
        RunOutcome::Detached { id, name, pid } => {
            tracing::info!(%id, %name, pid, "container started");
            println!("{id}");
            Ok(())
        }
        RunOutcome::Exited { id, code } => {
            tracing::info!(%id, code, "container exited");
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> Result<RunArgs, clap::Error> {
        Harness::try_parse_from(std::iter::once("run").chain(args.iter().copied())).map(|h| h.run)
    }

    #[test]
    fn flags_map_onto_run_options() {
        let args = parse(&[
            "--d", "--m", "100m", "--cpushare", "512", "--cpuset", "0-1", "--name", "web", "--net",
            "testbr", "--p", "8080:80", "--p", "8443:443", "--e", "A=1", "busybox", "top", "-b",
        ])
        .unwrap();
        let options = args.into_options();
        assert!(options.detach);
        assert_eq!(options.resources.memory_limit(), Some("100m"));
        assert_eq!(options.resources.cpu_share(), Some("512"));
        assert_eq!(options.resources.cpu_set(), Some("0-1"));
        assert_eq!(options.name.as_deref(), Some("web"));
        assert_eq!(options.network.as_deref(), Some("testbr"));
        assert_eq!(options.port_mapping, vec!["8080:80", "8443:443"]);
        assert_eq!(options.env, vec!["A=1"]);
        assert_eq!(options.image, "busybox");
        assert_eq!(options.command, vec!["top", "-b"]);
    }

    #[test]
    fn attached_is_the_default() {
        let options = parse(&["busybox", "sh"]).unwrap().into_options();
        assert!(!options.detach);
        assert!(options.volume.is_none());
    }

    #[test]
    fn ti_and_d_conflict() {
        assert!(parse(&["--ti", "--d", "busybox", "sh"]).is_err());
    }

    #[test]
    fn command_is_required() {
        assert!(parse(&["busybox"]).is_err());
    }
}
