//! # hutch-net
//!
//! Single-host bridge networking for hutch containers.
//!
//! - [`ipam`]: bitmap address allocator persisted to one JSON file.
//! - [`netlink`]: rtnetlink requests for bridges, veth pairs, addresses, and routes.
//! - [`firewall`]: `iptables` MASQUERADE and DNAT rules.
//! - [`bridge`]: the Linux bridge [`driver::NetworkDriver`].
//! - [`controller`]: the per-command registry of networks and endpoints.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bridge;
pub mod controller;
pub mod driver;
pub mod endpoint;
pub mod firewall;
pub mod ipam;
pub mod netlink;
pub mod network;
