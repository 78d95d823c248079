//! Attachments of containers to networks.

use std::net::Ipv4Addr;
use std::path::Path;

use hutch_common::constants::{VETH_NAME_PREFIX_LEN, VETH_PEER_PREFIX};
use hutch_common::error::Result;
use hutch_common::types::PortMapping;
use serde::{Deserialize, Serialize};

use crate::network::{read_record, remove_record, write_record};

/// The two ends of a veth pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VethPair {
    /// End that stays on the host, enslaved to the bridge.
    pub host_name: String,
    /// End moved into the container.
    pub peer_name: String,
}

impl VethPair {
    /// Derives device names from an endpoint ID.
    #[must_use]
    pub fn for_endpoint(endpoint_id: &str) -> Self {
        let short: String = endpoint_id.chars().take(VETH_NAME_PREFIX_LEN).collect();
        Self {
            peer_name: format!("{VETH_PEER_PREFIX}{short}"),
            host_name: short,
        }
    }
}

/// A container's attachment to one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// `<containerId>-<network>`.
    pub id: String,
    /// The veth pair carrying the traffic.
    pub device: VethPair,
    /// Address assigned inside the container.
    pub ip_address: Ipv4Addr,
    /// MAC address of the container end.
    pub mac_address: String,
    /// Name of the attached network.
    pub network: String,
    /// Published ports as `hostPort:containerPort` strings.
    #[serde(default)]
    pub port_mapping: Vec<String>,
}

impl Endpoint {
    /// Builds an endpoint record for `container_id` on `network`.
    #[must_use]
    pub fn new(container_id: &str, network: &str, ip: Ipv4Addr, port_mapping: Vec<String>) -> Self {
        let id = endpoint_id(container_id, network);
        Self {
            device: VethPair::for_endpoint(&id),
            id,
            ip_address: ip,
            mac_address: mac_for_ip(ip),
            network: network.to_string(),
            port_mapping,
        }
    }

    /// Published ports that parse; malformed entries are logged and skipped.
    #[must_use]
    pub fn valid_port_mappings(&self) -> Vec<PortMapping> {
        self.port_mapping
            .iter()
            .filter_map(|entry| match entry.parse::<PortMapping>() {
                Ok(mapping) => Some(mapping),
                Err(e) => {
                    tracing::warn!(endpoint = %self.id, mapping = %entry, error = %e, "skipping port mapping");
                    None
                }
            })
            .collect()
    }

    /// MAC address as raw bytes, if the stored string is well formed.
    #[must_use]
    pub fn mac_bytes(&self) -> Option<[u8; 6]> {
        let mut bytes = [0u8; 6];
        let mut parts = self.mac_address.split(':');
        for byte in &mut bytes {
            *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
        }
        parts.next().is_none().then_some(bytes)
    }

    /// Writes the record to `<dir>/<id>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn dump(&self, dir: &Path) -> Result<()> {
        write_record(dir, &self.id, self)
    }

    /// Reads the record stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        read_record(path)
    }

    /// Deletes the record from `dir`. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self, dir: &Path) -> Result<()> {
        remove_record(dir, &self.id)
    }
}

/// ID of the endpoint joining `container_id` to `network`.
#[must_use]
pub fn endpoint_id(container_id: &str, network: &str) -> String {
    format!("{container_id}-{network}")
}

/// Locally administered MAC derived from the IPv4 address.
fn mac_for_ip(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!("02:42:{a:02x}:{b:02x}:{c:02x}:{d:02x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn veth_names_use_endpoint_prefix() {
        let ep = Endpoint::new("4f2a9c1b7e", "testbr", Ipv4Addr::new(192, 168, 10, 2), vec![]);
        assert_eq!(ep.id, "4f2a9c1b7e-testbr");
        assert_eq!(ep.device.host_name, "4f2a9");
        assert_eq!(ep.device.peer_name, "cif-4f2a9");
    }

    #[test]
    fn mac_follows_address() {
        let ep = Endpoint::new("abc", "n", Ipv4Addr::new(192, 168, 10, 2), vec![]);
        assert_eq!(ep.mac_address, "02:42:c0:a8:0a:02");
        assert_eq!(ep.mac_bytes(), Some([0x02, 0x42, 0xc0, 0xa8, 0x0a, 0x02]));
    }

    #[test]
    fn malformed_port_mappings_are_skipped() {
        let ep = Endpoint::new(
            "abc",
            "n",
            Ipv4Addr::new(10, 0, 0, 2),
            vec!["8080:80".into(), "bogus".into(), "9000:90".into()],
        );
        let mappings = ep.valid_port_mappings();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[1].host_port, 9000);
    }

    #[test]
    fn record_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ep = Endpoint::new("abc", "n", Ipv4Addr::new(10, 0, 0, 2), vec!["80:80".into()]);
        ep.dump(dir.path()).expect("dump");
        let loaded = Endpoint::load(&dir.path().join(&ep.id)).expect("load");
        assert_eq!(loaded, ep);

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(&ep.id)).unwrap()).unwrap();
        assert_eq!(json["ipAddress"], "10.0.0.2");
        assert_eq!(json["device"]["peerName"], "cif-abc-n");
    }
}
