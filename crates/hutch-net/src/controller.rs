//! Network registry and container attachment.
//!
//! [`NetworkController`] is built once per command from the on-disk
//! registry. It owns the driver table and the IPAM store, and performs the
//! cross-namespace configuration of container endpoints.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use hutch_common::config::HutchConfig;
use hutch_common::error::{HutchError, Result};
use hutch_core::namespace::network::with_network_namespace;
use hutch_core::namespace::{NamespaceKind, open_namespace};
use ipnetwork::Ipv4Network;

use crate::bridge::{BridgeDriver, link_error};
use crate::driver::NetworkDriver;
use crate::endpoint::{Endpoint, endpoint_id};
use crate::firewall::{DnatRule, NatRule};
use crate::ipam::Ipam;
use crate::netlink::{NetlinkHandle, Route};
use crate::network::{Network, record_files};

/// Registry of networks, drivers, and the address allocator.
pub struct NetworkController {
    networks_dir: PathBuf,
    endpoints_dir: PathBuf,
    ipam: Ipam,
    drivers: HashMap<String, Box<dyn NetworkDriver>>,
    networks: BTreeMap<String, Network>,
}

impl std::fmt::Debug for NetworkController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkController")
            .field("networks_dir", &self.networks_dir)
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .field("networks", &self.networks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl NetworkController {
    /// Loads the registry with the bridge driver registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the networks directory cannot be read.
    pub fn load(config: &HutchConfig) -> Result<Self> {
        Self::with_drivers(config, vec![Box::new(BridgeDriver)])
    }

    /// Loads the registry with an explicit driver table.
    ///
    /// Unreadable network records are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the networks directory cannot be read.
    pub fn with_drivers(config: &HutchConfig, drivers: Vec<Box<dyn NetworkDriver>>) -> Result<Self> {
        let networks_dir = config.networks_dir();
        let mut networks = BTreeMap::new();
        for path in record_files(&networks_dir)? {
            match Network::load(&path) {
                Ok(network) => {
                    let _ = networks.insert(network.name.clone(), network);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping network record"),
            }
        }

        Ok(Self {
            networks_dir,
            endpoints_dir: config.endpoints_dir(),
            ipam: Ipam::new(config.ipam_file()),
            drivers: drivers
                .into_iter()
                .map(|driver| (driver.name().to_string(), driver))
                .collect(),
            networks,
        })
    }

    /// Creates network `name` on `subnet` with `driver`.
    ///
    /// The first address of the subnet becomes the gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid device name, the driver
    /// is unknown, the name is taken, the subnet is invalid, or the driver
    /// fails. The gateway address is
    /// released again on failure.
    pub fn create_network(&mut self, driver: &str, subnet: &str, name: &str) -> Result<Network> {
        Network::validate_name(name)?;
        if self.networks.contains_key(name) {
            return Err(HutchError::AlreadyExists {
                kind: "network",
                id: name.to_string(),
            });
        }
        let driver = self.driver(driver)?;
        let subnet: Ipv4Network = subnet.parse().map_err(|e| HutchError::Config {
            message: format!("invalid subnet {subnet}: {e}"),
        })?;

        let gateway_ip = self.ipam.allocate(&subnet)?;
        let gateway = Ipv4Network::new(gateway_ip, subnet.prefix()).map_err(|e| HutchError::Config {
            message: format!("invalid subnet {subnet}: {e}"),
        })?;

        let network = match driver
            .create(gateway, name)
            .and_then(|network| network.dump(&self.networks_dir).map(|()| network))
        {
            Ok(network) => network,
            Err(e) => {
                self.release_quietly(&subnet, gateway_ip);
                return Err(e);
            }
        };

        tracing::info!(network = name, ip_range = %network.ip_range, driver = %network.driver, "network created");
        let _ = self.networks.insert(name.to_string(), network.clone());
        Ok(network)
    }

    /// Every known network, ordered by name.
    #[must_use]
    pub fn list_networks(&self) -> Vec<&Network> {
        self.networks.values().collect()
    }

    /// Looks up a network by name.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::NotFound`] if no network has that name.
    pub fn network(&self, name: &str) -> Result<&Network> {
        self.networks.get(name).ok_or_else(|| HutchError::NotFound {
            kind: "network",
            id: name.to_string(),
        })
    }

    /// Removes network `name`, releasing its gateway address.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::NotFound`] for an unknown name without touching
    /// the allocator, and an error if containers are still attached or the
    /// driver fails.
    pub fn remove_network(&mut self, name: &str) -> Result<()> {
        let network = self.network(name)?.clone();
        let attached = self
            .endpoints()?
            .into_iter()
            .filter(|endpoint| endpoint.network == name)
            .count();
        if attached > 0 {
            return Err(HutchError::InvalidState {
                message: format!("network {name} still has {attached} attached endpoint(s)"),
            });
        }

        self.driver(&network.driver)?.delete(&network)?;
        self.ipam.release(&network.subnet(), network.ip_range.ip())?;
        network.remove(&self.networks_dir)?;
        let _ = self.networks.remove(name);

        tracing::info!(network = name, "network removed");
        Ok(())
    }

    /// Reserves an address on `network` for `container_id` and builds the
    /// endpoint record. Nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the network is unknown or its subnet is exhausted.
    pub fn allocate_endpoint(
        &self,
        network: &str,
        container_id: &str,
        port_mapping: &[String],
    ) -> Result<Endpoint> {
        let network = self.network(network)?;
        let ip = self.ipam.allocate(&network.subnet())?;
        Ok(Endpoint::new(container_id, &network.name, ip, port_mapping.to_vec()))
    }

    /// Attaches the container running as `pid` to `network`.
    ///
    /// Allocates an address, creates the veth pair, configures the container
    /// end inside the container's network namespace, and publishes the
    /// requested ports. Everything set up is undone on failure.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn connect(
        &self,
        network: &str,
        container_id: &str,
        pid: u32,
        port_mapping: &[String],
    ) -> Result<Endpoint> {
        let mut endpoint = self.allocate_endpoint(network, container_id, port_mapping)?;
        let network = self.network(network)?;

        if let Err(e) = self.plumb(network, &mut endpoint, pid) {
            tracing::warn!(endpoint = %endpoint.id, error = %e, "attach failed, rolling back");
            self.teardown_endpoint(network, &endpoint);
            return Err(e);
        }

        tracing::info!(
            endpoint = %endpoint.id,
            ip = %endpoint.ip_address,
            network = %network.name,
            "container attached"
        );
        Ok(endpoint)
    }

    fn plumb(&self, network: &Network, endpoint: &mut Endpoint, pid: u32) -> Result<()> {
        let driver = self.driver(&network.driver)?;
        driver.connect(network, endpoint)?;

        let netns = open_namespace(pid, NamespaceKind::Net)?;
        move_into_namespace(&endpoint.device.peer_name, &netns)?;
        configure_container_side(&netns, endpoint, network)?;

        for mapping in endpoint.valid_port_mappings() {
            NatRule::from(DnatRule {
                host_port: mapping.host_port,
                container_ip: endpoint.ip_address,
                container_port: mapping.container_port,
            })
            .install()?;
        }

        endpoint.dump(&self.endpoints_dir)
    }

    /// Detaches `container_id` from `network`, releasing its address and
    /// published ports. Detaching an unknown endpoint is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the network is unknown or the endpoint record
    /// cannot be read.
    pub fn disconnect(&self, network: &str, container_id: &str) -> Result<()> {
        let network = self.network(network)?;
        let path = self.endpoints_dir.join(endpoint_id(container_id, &network.name));
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no endpoint to detach");
            return Ok(());
        }
        let endpoint = Endpoint::load(&path)?;
        self.teardown_endpoint(network, &endpoint);
        tracing::info!(endpoint = %endpoint.id, "container detached");
        Ok(())
    }

    /// Best-effort undo of everything [`NetworkController::connect`] sets up.
    fn teardown_endpoint(&self, network: &Network, endpoint: &Endpoint) {
        for mapping in endpoint.valid_port_mappings() {
            let rule = NatRule::from(DnatRule {
                host_port: mapping.host_port,
                container_ip: endpoint.ip_address,
                container_port: mapping.container_port,
            });
            if let Err(e) = rule.remove() {
                tracing::warn!(endpoint = %endpoint.id, error = %e, "failed to remove port mapping");
            }
        }
        match self.driver(&network.driver) {
            Ok(driver) => {
                if let Err(e) = driver.disconnect(network, endpoint) {
                    tracing::warn!(endpoint = %endpoint.id, error = %e, "driver disconnect failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "cannot detach endpoint"),
        }
        self.release_quietly(&network.subnet(), endpoint.ip_address);
        if let Err(e) = endpoint.remove(&self.endpoints_dir) {
            tracing::warn!(endpoint = %endpoint.id, error = %e, "failed to remove endpoint record");
        }
    }

    /// Every persisted endpoint; unreadable records are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoints directory cannot be read.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let mut endpoints = Vec::new();
        for path in record_files(&self.endpoints_dir)? {
            match Endpoint::load(&path) {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping endpoint record"),
            }
        }
        Ok(endpoints)
    }

    fn driver(&self, name: &str) -> Result<&dyn NetworkDriver> {
        self.drivers
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| HutchError::NotFound {
                kind: "network driver",
                id: name.to_string(),
            })
    }

    fn release_quietly(&self, subnet: &Ipv4Network, ip: Ipv4Addr) {
        if let Err(e) = self.ipam.release(subnet, ip) {
            tracing::warn!(subnet = %subnet, ip = %ip, error = %e, "failed to release address");
        }
    }
}

/// Moves link `name` from the host into the namespace behind `netns`.
fn move_into_namespace(name: &str, netns: &File) -> Result<()> {
    let mut handle = NetlinkHandle::new().map_err(|e| link_error("open netlink for", name, &e))?;
    let index = handle
        .ifindex(name)
        .map_err(|e| link_error("look up", name, &e))?;
    handle
        .set_link_netns(index, netns.as_raw_fd())
        .map_err(|e| link_error("move into container", name, &e))
}

/// Assigns the endpoint address, brings links up, and routes via the gateway,
/// all from inside the container's network namespace.
fn configure_container_side(netns: &File, endpoint: &Endpoint, network: &Network) -> Result<()> {
    let peer = endpoint.device.peer_name.clone();
    let address = Ipv4Network::new(endpoint.ip_address, network.ip_range.prefix()).map_err(|e| {
        HutchError::Network {
            message: format!("invalid endpoint address {}: {e}", endpoint.ip_address),
        }
    })?;
    let gateway = network.ip_range.ip();

    with_network_namespace(netns, move || {
        let mut handle = NetlinkHandle::new().map_err(|e| link_error("open netlink for", &peer, &e))?;
        let index = handle
            .ifindex(&peer)
            .map_err(|e| link_error("look up", &peer, &e))?;
        handle
            .add_address(index, address)
            .map_err(|e| link_error("assign address to", &peer, &e))?;
        handle
            .set_link_up(index, true)
            .map_err(|e| link_error("bring up", &peer, &e))?;
        let lo = handle
            .ifindex("lo")
            .map_err(|e| link_error("look up", "lo", &e))?;
        handle
            .set_link_up(lo, true)
            .map_err(|e| link_error("bring up", "lo", &e))?;
        let default = Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).map_err(|e| HutchError::Network {
            message: e.to_string(),
        })?;
        handle
            .add_route(&Route {
                destination: default,
                gateway: Some(gateway),
                ifindex: index,
            })
            .map_err(|e| link_error("add default route via", &peer, &e))?;
        tracing::debug!(peer = %peer, address = %address, gateway = %gateway, "container interface configured");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records driver calls without touching the host.
    #[derive(Default, Clone)]
    struct FakeDriver {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl NetworkDriver for FakeDriver {
        fn name(&self) -> &str {
            "bridge"
        }

        fn create(&self, gateway: Ipv4Network, name: &str) -> Result<Network> {
            self.calls.lock().unwrap().push(format!("create {name} {gateway}"));
            Ok(Network {
                name: name.to_string(),
                ip_range: gateway,
                driver: "bridge".into(),
            })
        }

        fn delete(&self, network: &Network) -> Result<()> {
            self.calls.lock().unwrap().push(format!("delete {}", network.name));
            Ok(())
        }

        fn connect(&self, _network: &Network, endpoint: &mut Endpoint) -> Result<()> {
            self.calls.lock().unwrap().push(format!("connect {}", endpoint.id));
            Ok(())
        }

        fn disconnect(&self, _network: &Network, endpoint: &Endpoint) -> Result<()> {
            self.calls.lock().unwrap().push(format!("disconnect {}", endpoint.id));
            Ok(())
        }
    }

    fn controller(config: &HutchConfig, driver: &FakeDriver) -> NetworkController {
        NetworkController::with_drivers(config, vec![Box::new(driver.clone())]).expect("load")
    }

    fn setup() -> (tempfile::TempDir, HutchConfig, FakeDriver) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HutchConfig::with_root(dir.path());
        (dir, config, FakeDriver::default())
    }

    #[test]
    fn create_network_uses_first_address_as_gateway() {
        let (_dir, config, driver) = setup();
        let mut ctl = controller(&config, &driver);

        let network = ctl
            .create_network("bridge", "192.168.10.0/24", "testnet")
            .expect("create");

        assert_eq!(network.ip_range.ip(), Ipv4Addr::new(192, 168, 10, 1));
        assert_eq!(network.ip_range.prefix(), 24);
        assert!(config.networks_dir().join("testnet").exists());
        assert_eq!(driver.calls.lock().unwrap()[0], "create testnet 192.168.10.1/24");
    }

    #[test]
    fn networks_survive_a_reload() {
        let (_dir, config, driver) = setup();
        let _ = controller(&config, &driver)
            .create_network("bridge", "10.9.0.0/24", "a")
            .unwrap();

        let reloaded = controller(&config, &driver);
        let names: Vec<_> = reloaded.list_networks().iter().map(|n| n.name.clone()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn duplicate_network_is_rejected() {
        let (_dir, config, driver) = setup();
        let mut ctl = controller(&config, &driver);
        let _ = ctl.create_network("bridge", "10.0.0.0/24", "dup").unwrap();
        let err = ctl
            .create_network("bridge", "10.1.0.0/24", "dup")
            .expect_err("duplicate");
        assert!(matches!(err, HutchError::AlreadyExists { .. }));
    }

    #[test]
    fn unknown_driver_does_not_allocate() {
        let (_dir, config, driver) = setup();
        let mut ctl = controller(&config, &driver);
        assert!(ctl.create_network("macvlan", "10.0.0.0/24", "x").is_err());
        assert!(!config.ipam_file().exists());
    }

    #[test]
    fn invalid_names_are_rejected_before_any_side_effect() {
        let (dir, config, driver) = setup();
        let mut ctl = controller(&config, &driver);

        for name in ["../escape", "a/b", "hutch-net-012345", "br 0"] {
            let err = ctl
                .create_network("bridge", "10.0.0.0/24", name)
                .expect_err("invalid name");
            assert!(matches!(err, HutchError::Config { .. }), "{name}");
        }

        assert!(driver.calls.lock().unwrap().is_empty());
        assert!(!config.ipam_file().exists());
        assert!(!dir.path().join("run/network/escape").exists());
        assert!(!dir.path().join("run/escape").exists());
        assert!(ctl.list_networks().is_empty());
    }

    #[test]
    fn removing_unknown_network_leaves_allocator_alone() {
        let (_dir, config, driver) = setup();
        let mut ctl = controller(&config, &driver);

        let err = ctl.remove_network("ghost").expect_err("unknown");
        assert_eq!(err.to_string(), "no such network: ghost");
        assert!(!config.ipam_file().exists());
    }

    #[test]
    fn remove_network_releases_gateway() {
        let (_dir, config, driver) = setup();
        let mut ctl = controller(&config, &driver);
        let _ = ctl.create_network("bridge", "10.0.0.0/24", "br0").unwrap();

        ctl.remove_network("br0").expect("remove");

        assert!(ctl.list_networks().is_empty());
        assert!(!config.networks_dir().join("br0").exists());
        let bitmap = Ipam::new(config.ipam_file())
            .bitmap(&"10.0.0.0/24".parse().unwrap())
            .unwrap()
            .unwrap();
        assert!(!bitmap.contains('1'));
    }

    #[test]
    fn remove_network_refuses_while_endpoints_attached() {
        let (_dir, config, driver) = setup();
        let mut ctl = controller(&config, &driver);
        let _ = ctl.create_network("bridge", "10.0.0.0/24", "br0").unwrap();
        let endpoint = ctl.allocate_endpoint("br0", "aaaaaaaaaa", &[]).unwrap();
        endpoint.dump(&config.endpoints_dir()).unwrap();

        assert!(ctl.remove_network("br0").is_err());
        assert!(config.networks_dir().join("br0").exists());
    }

    #[test]
    fn addresses_are_reused_after_disconnect() {
        let (_dir, config, driver) = setup();
        let mut ctl = controller(&config, &driver);
        let _ = ctl.create_network("bridge", "10.0.0.0/24", "br0").unwrap();

        let a = ctl.allocate_endpoint("br0", "aaaaaaaaaa", &[]).unwrap();
        a.dump(&config.endpoints_dir()).unwrap();
        let b = ctl.allocate_endpoint("br0", "bbbbbbbbbb", &[]).unwrap();
        b.dump(&config.endpoints_dir()).unwrap();
        assert_eq!(a.ip_address, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(b.ip_address, Ipv4Addr::new(10, 0, 0, 3));

        ctl.disconnect("br0", "aaaaaaaaaa").expect("disconnect");
        assert!(!config.endpoints_dir().join(&a.id).exists());

        let c = ctl.allocate_endpoint("br0", "cccccccccc", &[]).unwrap();
        assert_eq!(c.ip_address, Ipv4Addr::new(10, 0, 0, 2));
        assert!(
            driver
                .calls
                .lock()
                .unwrap()
                .contains(&"disconnect aaaaaaaaaa-br0".to_string())
        );
    }

    #[test]
    fn disconnect_without_endpoint_is_noop() {
        let (_dir, config, driver) = setup();
        let mut ctl = controller(&config, &driver);
        let _ = ctl.create_network("bridge", "10.0.0.0/24", "br0").unwrap();
        ctl.disconnect("br0", "nobody").expect("noop");
    }
}
