//! Linux bridge driver.
//!
//! Each network is a bridge device named after the network, holding the
//! gateway address, with a MASQUERADE rule for its subnet. Containers
//! attach through veth pairs whose host end is enslaved to the bridge.

use std::io;
use std::path::Path;

use hutch_common::constants::DEFAULT_NETWORK_DRIVER;
use hutch_common::error::{HutchError, Result};
use ipnetwork::Ipv4Network;

use crate::driver::NetworkDriver;
use crate::endpoint::Endpoint;
use crate::firewall::{self, MasqueradeRule, NatRule};
use crate::netlink::{self, NetlinkHandle};
use crate::network::Network;

const SYS_CLASS_NET: &str = "/sys/class/net";

/// The default network driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct BridgeDriver;

impl BridgeDriver {
    /// Creates the bridge `name` with `gateway` assigned, bringing it up.
    ///
    /// An existing bridge or an already assigned address is reused.
    fn init_bridge(handle: &mut NetlinkHandle, name: &str, gateway: Ipv4Network) -> Result<()> {
        if netlink::link_index(name).map_err(|e| link_error("look up bridge", name, &e))?.is_none() {
            handle
                .create_bridge(name)
                .or_else(ignore_exists)
                .map_err(|e| link_error("create bridge", name, &e))?;
            tracing::info!(bridge = name, "bridge created");
        }
        let index = handle
            .ifindex(name)
            .map_err(|e| link_error("look up bridge", name, &e))?;
        handle
            .add_address(index, gateway)
            .or_else(ignore_exists)
            .map_err(|e| link_error("assign gateway to", name, &e))?;
        handle
            .set_link_up(index, true)
            .map_err(|e| link_error("bring up", name, &e))?;
        Ok(())
    }

    /// Refuses to take over an existing device that is not a bridge, such
    /// as a host NIC that happens to share the network's name.
    fn check_existing_link(sys_net: &Path, name: &str) -> Result<()> {
        let exists = netlink::link_index(name)
            .map_err(|e| link_error("look up bridge", name, &e))?
            .is_some();
        if exists && !is_bridge(sys_net, name) {
            return Err(HutchError::AlreadyExists {
                kind: "network device",
                id: name.to_string(),
            });
        }
        Ok(())
    }

    fn masquerade(network: &Network) -> NatRule {
        MasqueradeRule::new(network.subnet(), network.name.clone()).into()
    }
}

impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &str {
        DEFAULT_NETWORK_DRIVER
    }

    fn create(&self, gateway: Ipv4Network, name: &str) -> Result<Network> {
        let network = Network {
            name: name.to_string(),
            ip_range: gateway,
            driver: self.name().to_string(),
        };

        Self::check_existing_link(Path::new(SYS_CLASS_NET), name)?;
        let mut handle = open_handle()?;
        Self::init_bridge(&mut handle, name, gateway)?;

        if let Err(e) = firewall::enable_ip_forward() {
            tracing::warn!(error = %e, "could not enable IPv4 forwarding");
        }
        Self::masquerade(&network).install()?;

        tracing::info!(network = name, gateway = %gateway, "bridge network ready");
        Ok(network)
    }

    fn delete(&self, network: &Network) -> Result<()> {
        let mut handle = open_handle()?;
        let index = netlink::link_index(&network.name)
            .map_err(|e| link_error("look up bridge", &network.name, &e))?;
        if let Some(index) = index {
            handle
                .delete_link(index)
                .map_err(|e| link_error("delete bridge", &network.name, &e))?;
        }
        Self::masquerade(network).remove()?;
        tracing::info!(network = %network.name, "bridge network removed");
        Ok(())
    }

    fn connect(&self, network: &Network, endpoint: &mut Endpoint) -> Result<()> {
        let mut handle = open_handle()?;
        let master = handle
            .ifindex(&network.name)
            .map_err(|e| link_error("look up bridge", &network.name, &e))?;
        let device = &endpoint.device;
        handle
            .create_veth(
                &device.host_name,
                &device.peer_name,
                endpoint.mac_bytes(),
                master,
            )
            .map_err(|e| link_error("create veth", &device.host_name, &e))?;

        let host_index = handle
            .ifindex(&device.host_name)
            .map_err(|e| link_error("look up veth", &device.host_name, &e))?;
        handle
            .set_link_up(host_index, true)
            .map_err(|e| link_error("bring up", &device.host_name, &e))?;

        tracing::debug!(
            network = %network.name,
            host = %device.host_name,
            peer = %device.peer_name,
            "veth pair attached to bridge"
        );
        Ok(())
    }

    fn disconnect(&self, _network: &Network, endpoint: &Endpoint) -> Result<()> {
        // The veth pair dies with the container's network namespace; only a
        // leftover host end from a failed attach needs removing.
        let index = netlink::link_index(&endpoint.device.host_name)
            .map_err(|e| link_error("look up veth", &endpoint.device.host_name, &e))?;
        if let Some(index) = index {
            open_handle()?
                .delete_link(index)
                .map_err(|e| link_error("delete veth", &endpoint.device.host_name, &e))?;
        }
        Ok(())
    }
}

/// A bridge device exposes a `bridge` directory in sysfs.
fn is_bridge(sys_net: &Path, name: &str) -> bool {
    sys_net.join(name).join("bridge").is_dir()
}

fn open_handle() -> Result<NetlinkHandle> {
    NetlinkHandle::new().map_err(|e| HutchError::Network {
        message: format!("failed to open netlink socket: {e}"),
    })
}

fn ignore_exists(e: io::Error) -> io::Result<()> {
    if e.raw_os_error() == Some(libc::EEXIST) {
        Ok(())
    } else {
        Err(e)
    }
}

pub(crate) fn link_error(action: &str, name: &str, err: &io::Error) -> HutchError {
    HutchError::Network {
        message: format!("failed to {action} {name}: {err}"),
    }
}
