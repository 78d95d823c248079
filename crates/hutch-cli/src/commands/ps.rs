//! `hutch ps`: list containers.

use clap::Args;
use hutch_runtime::container::ContainerInfo;
use hutch_runtime::engine::Engine;

use crate::output::{format_pid, format_table};

const HEADERS: [&str; 6] = ["ID", "NAME", "PID", "STATUS", "COMMAND", "CREATED"];

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Only show running containers.
    #[arg(long)]
    pub running: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the state directory cannot be read.
pub fn execute(args: PsArgs, engine: &Engine) -> anyhow::Result<()> {
    let containers = engine.list()?;
    let rows: Vec<Vec<String>> = containers
        .iter()
        .filter(|c| !args.running || c.pid.is_some())
        .map(row)
        .collect();
    println!("{}", format_table(&HEADERS, &rows));
    Ok(())
}

fn row(info: &ContainerInfo) -> Vec<String> {
    vec![
        info.id.to_string(),
        info.name.clone(),
        format_pid(info.pid),
        info.status.to_string(),
        info.command.clone(),
        info.create_time.clone(),
    ]
}

#[cfg(test)]
mod tests {
    use hutch_common::types::{ContainerId, ContainerStatus};

    use super::*;

    #[test]
    fn stopped_container_row_has_blank_pid() {
        let mut info = ContainerInfo::new(ContainerId::new("1234567890"), "web".into(), 42, &["top".into()]);
        info.finish(ContainerStatus::Stopped);
        let cells = row(&info);
        assert_eq!(cells[0], "1234567890");
        assert_eq!(cells[1], "web");
        assert_eq!(cells[2], "");
        assert_eq!(cells[3], "stopped");
        assert_eq!(cells[4], "top");
    }
}
