//! The seam between the network controller and link-level plumbing.

use ipnetwork::Ipv4Network;

use hutch_common::error::Result;

use crate::endpoint::Endpoint;
use crate::network::Network;

/// Creates, deletes, and attaches to networks of one kind.
pub trait NetworkDriver: Send + Sync {
    /// Name under which the driver is registered, e.g. `bridge`.
    fn name(&self) -> &str;

    /// Builds the host-side device for network `name`.
    ///
    /// `gateway` carries the gateway address and the subnet prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be configured.
    fn create(&self, gateway: Ipv4Network, name: &str) -> Result<Network>;

    /// Tears down the host-side device of `network`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be removed.
    fn delete(&self, network: &Network) -> Result<()>;

    /// Creates the link for `endpoint` and attaches its host end to `network`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be created.
    fn connect(&self, network: &Network, endpoint: &mut Endpoint) -> Result<()>;

    /// Detaches `endpoint` from `network`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be removed.
    fn disconnect(&self, network: &Network, endpoint: &Endpoint) -> Result<()>;
}
