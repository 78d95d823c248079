//! `hutch network`: create, list, and remove container networks.

use clap::{Args, Subcommand};
use hutch_runtime::engine::Engine;

use crate::output::format_table;

/// Arguments for the `network` command.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Network operation.
    #[command(subcommand)]
    pub command: NetworkCommand,
}

/// Network operations.
#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a network.
    Create {
        /// Driver backing the network.
        #[arg(long, default_value = "bridge")]
        driver: String,
        /// Subnet in CIDR form, e.g. `192.168.10.0/24`.
        #[arg(long)]
        subnet: String,
        /// Network name; also the name of the bridge device.
        name: String,
    },
    /// List networks.
    #[command(alias = "ls")]
    List,
    /// Remove a network.
    #[command(alias = "rm")]
    Remove {
        /// Network name.
        name: String,
    },
}

/// Executes the `network` command.
///
/// # Errors
///
/// Returns an error if the network operation fails.
pub fn execute(args: NetworkArgs, engine: &Engine) -> anyhow::Result<()> {
    match args.command {
        NetworkCommand::Create { driver, subnet, name } => {
            let network = engine.create_network(&driver, &subnet, &name)?;
            println!("{}", network.name);
        }
        NetworkCommand::List => {
            let rows: Vec<Vec<String>> = engine
                .list_networks()?
                .into_iter()
                .map(|n| vec![n.name, n.ip_range.to_string(), n.driver])
                .collect();
            println!("{}", format_table(&["NAME", "IP RANGE", "DRIVER"], &rows));
        }
        NetworkCommand::Remove { name } => {
            engine.remove_network(&name)?;
            println!("{name}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(subcommand)]
        command: NetworkCommand,
    }

    #[test]
    fn create_defaults_to_bridge_driver() {
        let h = Harness::try_parse_from(["network", "create", "--subnet", "192.168.10.0/24", "testbr"]).unwrap();
        assert!(matches!(
            h.command,
            NetworkCommand::Create { ref driver, ref subnet, ref name }
                if driver == "bridge" && subnet == "192.168.10.0/24" && name == "testbr"
        ));
    }

    #[test]
    fn create_requires_subnet() {
        assert!(Harness::try_parse_from(["network", "create", "testbr"]).is_err());
    }
}
