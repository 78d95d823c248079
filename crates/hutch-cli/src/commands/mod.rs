//! CLI command definitions and dispatch.

pub mod commit;
pub mod enter;
pub mod exec;
pub mod init;
pub mod logs;
pub mod network;
pub mod ps;
pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hutch_common::config::HutchConfig;
use hutch_runtime::engine::Engine;

/// hutch: a small, daemon-less container runtime.
#[derive(Parser, Debug)]
#[command(name = "hutch", version, about, long_about = None)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Relocate all state and storage under this directory.
    #[arg(long, global = true, env = "HUTCH_ROOT")]
    pub root: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    fn config(&self) -> HutchConfig {
        self.root
            .as_deref()
            .map_or_else(HutchConfig::default, HutchConfig::with_root)
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and start a container.
    Run(run::RunArgs),
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Run a command inside a running container.
    Exec(exec::ExecArgs),
    /// Remove a stopped container.
    Rm(rm::RmArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Print the logs of a detached container.
    Logs(logs::LogsArgs),
    /// Save a container's root filesystem as an image archive.
    Commit(commit::CommitArgs),
    /// Manage container networks.
    Network(network::NetworkArgs),
    /// Container init; started by `run` inside the new namespaces.
    #[command(hide = true)]
    Init(init::InitArgs),
    /// Namespace entry helper; started by `exec`.
    #[command(hide = true)]
    Enter(enter::EnterArgs),
}

/// Dispatches the parsed CLI command to the appropriate handler.
///
/// # Errors
///
/// Returns an error if the executed command fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let engine = Engine::new(cli.config());
    match cli.command {
        Command::Run(args) => run::execute(args, &engine),
        Command::Stop(args) => stop::execute(args, &engine),
        Command::Exec(args) => exec::execute(args, &engine),
        Command::Rm(args) => rm::execute(args, &engine),
        Command::Ps(args) => ps::execute(args, &engine),
        Command::Logs(args) => logs::execute(args, &engine),
        Command::Commit(args) => commit::execute(args, &engine),
        Command::Network(args) => network::execute(args, &engine),
        Command::Init(args) => init::execute(args),
        Command::Enter(args) => enter::execute(args),
    }
}
