//! IP address management.
//!
//! Each subnet owns a bitmap string with one character per address in the
//! subnet (`0` free, `1` used). Offset `n` maps to `base + n + 1`, so the
//! first allocation in a fresh subnet is `.1`, which networks take as their
//! gateway. The store is re-read before and written after every change.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use hutch_common::error::{HutchError, Result};
use ipnetwork::Ipv4Network;

/// Smallest accepted prefix length; larger subnets would need huge bitmaps.
pub const MIN_PREFIX_LEN: u8 = 16;

const FREE: u8 = b'0';
const USED: u8 = b'1';

type Allocations = BTreeMap<String, String>;

/// Allocator backed by a JSON map of CIDR to bitmap.
#[derive(Debug, Clone)]
pub struct Ipam {
    path: PathBuf,
}

impl Ipam {
    /// Creates an allocator persisting to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reserves the lowest free address of `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::AddressExhausted`] when every usable address is
    /// taken, or an error if the store cannot be read or written.
    pub fn allocate(&self, subnet: &Ipv4Network) -> Result<Ipv4Addr> {
        let subnet = canonical(subnet)?;
        let key = subnet.to_string();
        let size = host_space(subnet.prefix());

        let mut allocations = self.load()?;
        let mut bitmap = allocations
            .remove(&key)
            .unwrap_or_else(|| "0".repeat(size))
            .into_bytes();
        check_bitmap(&key, &bitmap, size)?;

        // The last two offsets would map to the broadcast address and past it.
        let usable = size.saturating_sub(2);
        let offset = bitmap[..usable]
            .iter()
            .position(|bit| *bit == FREE)
            .ok_or_else(|| HutchError::AddressExhausted {
                subnet: key.clone(),
            })?;
        bitmap[offset] = USED;

        let ip = offset_to_ip(&subnet, offset);
        let encoded = bitmap_string(&key, bitmap)?;
        let _ = allocations.insert(key, encoded);
        self.dump(&allocations)?;

        tracing::debug!(subnet = %subnet, ip = %ip, "address allocated");
        Ok(ip)
    }

    /// Returns `ip` to the free pool of `subnet`.
    ///
    /// Releasing into a subnet that has never been allocated from is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if `ip` is not a host address of `subnet`, or if the
    /// store cannot be read or written.
    pub fn release(&self, subnet: &Ipv4Network, ip: Ipv4Addr) -> Result<()> {
        let subnet = canonical(subnet)?;
        let key = subnet.to_string();
        let size = host_space(subnet.prefix());
        let offset = ip_to_offset(&subnet, ip).ok_or_else(|| HutchError::Config {
            message: format!("{ip} is not a host address of {key}"),
        })?;

        let mut allocations = self.load()?;
        let Some(bitmap) = allocations.get_mut(&key) else {
            return Ok(());
        };
        let mut bits = std::mem::take(bitmap).into_bytes();
        check_bitmap(&key, &bits, size)?;
        bits[offset] = FREE;
        *bitmap = bitmap_string(&key, bits)?;
        self.dump(&allocations)?;

        tracing::debug!(subnet = %subnet, ip = %ip, "address released");
        Ok(())
    }

    /// Returns the stored bitmap of `subnet`, if it has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn bitmap(&self, subnet: &Ipv4Network) -> Result<Option<String>> {
        let key = canonical(subnet)?.to_string();
        Ok(self.load()?.remove(&key))
    }

    fn load(&self) -> Result<Allocations> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Allocations::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Allocations::new()),
            Err(e) => Err(HutchError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    fn dump(&self, allocations: &Allocations) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HutchError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_vec(allocations)?;
        std::fs::write(&self.path, json).map_err(|e| HutchError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}

/// Normalizes `subnet` to its network address and validates its size.
fn canonical(subnet: &Ipv4Network) -> Result<Ipv4Network> {
    if subnet.prefix() < MIN_PREFIX_LEN {
        return Err(HutchError::Config {
            message: format!("subnet {subnet} is larger than /{MIN_PREFIX_LEN}"),
        });
    }
    Ipv4Network::new(subnet.network(), subnet.prefix()).map_err(|e| HutchError::Config {
        message: format!("invalid subnet {subnet}: {e}"),
    })
}

const fn host_space(prefix: u8) -> usize {
    1usize << (32 - prefix as u32)
}

fn offset_to_ip(subnet: &Ipv4Network, offset: usize) -> Ipv4Addr {
    // offset < 2^16 by MIN_PREFIX_LEN, so the cast cannot truncate.
    #[allow(clippy::cast_possible_truncation)]
    let offset = offset as u32;
    Ipv4Addr::from(u32::from(subnet.network()) + offset + 1)
}

fn ip_to_offset(subnet: &Ipv4Network, ip: Ipv4Addr) -> Option<usize> {
    if !subnet.contains(ip) {
        return None;
    }
    let delta = u32::from(ip).checked_sub(u32::from(subnet.network()))?;
    delta.checked_sub(1).map(|o| o as usize)
}

/// Rejects a stored bitmap of the wrong length or with characters other
/// than `0` and `1`.
fn check_bitmap(key: &str, bitmap: &[u8], size: usize) -> Result<()> {
    if bitmap.len() != size {
        return Err(HutchError::InvalidState {
            message: format!(
                "allocation bitmap for {key} has {} entries, expected {size}",
                bitmap.len()
            ),
        });
    }
    if let Some(bad) = bitmap.iter().position(|bit| *bit != FREE && *bit != USED) {
        return Err(HutchError::InvalidState {
            message: format!("allocation bitmap for {key} is corrupt at offset {bad}"),
        });
    }
    Ok(())
}

fn bitmap_string(key: &str, bits: Vec<u8>) -> Result<String> {
    String::from_utf8(bits).map_err(|_| HutchError::InvalidState {
        message: format!("allocation bitmap for {key} is not valid text"),
    })
}
